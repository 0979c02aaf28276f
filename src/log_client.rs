//! HTTP client for a single CT log's `/ct/v1/*` endpoints.

use std::time::Duration;

use openssl::nid::Nid;
use openssl::pkey::{PKey, Public};

use crate::entry::RawEntry;
use crate::jsons;
use crate::sth::SignedTreeHead;
use crate::utils::decode_base64_field;
use crate::Error;

/// Response body caps from §6: 64 KiB for the STH, 2 GiB for an entries batch.
const MAX_STH_BODY: u64 = 64 * 1024;
const MAX_ENTRIES_BODY: u64 = 2 * 1024 * 1024 * 1024;

/// A CT log: its base URL and the public key used to verify its STH
/// signatures.
pub struct Log {
    base_url: reqwest::Url,
    pub_key: PKey<Public>,
    http_client: reqwest::Client,
}

impl Log {
    /// Construct a client for the log at `base_url` (which must end in `/`)
    /// using a PEM-encoded P-256 ECDSA public key. Equivalent to
    /// `Self::new_with_insecure_allowlist(base_url, pub_key_pem, &[])`.
    pub fn new(base_url: &str, pub_key_pem: &str) -> Result<Self, Error> {
        Self::new_with_insecure_allowlist(base_url, pub_key_pem, &[])
    }

    /// Like [`Self::new`], but certificate verification is skipped for this
    /// log's requests if `base_url` starts with one of the entries in
    /// `insecure_allowlist`.
    ///
    /// Note the direction of the prefix check: it is the *configured*
    /// `base_url` that must start with a *known, allowlisted* hostname
    /// string, not the other way around.
    pub fn new_with_insecure_allowlist(
        base_url: &str,
        pub_key_pem: &str,
        insecure_allowlist: &[&str],
    ) -> Result<Self, Error> {
        if !base_url.ends_with('/') {
            return Err(Error::InvalidArgument("base_url must end with /".to_owned()));
        }
        let url = reqwest::Url::parse(base_url)
            .map_err(|e| Error::InvalidArgument(format!("unable to parse url: {}", e)))?;

        let pub_key = PKey::public_key_from_pem(pub_key_pem.as_bytes())
            .map_err(|e| Error::InvalidArgument(format!("error parsing public key: {}", e)))?;
        let ec_key = pub_key
            .ec_key()
            .map_err(|_| Error::InvalidArgument("only ECDSA keys are supported".to_owned()))?;
        let curve = ec_key
            .group()
            .curve_name()
            .ok_or_else(|| Error::InvalidArgument("key has no named curve".to_owned()))?;
        if curve != Nid::X9_62_PRIME256V1 {
            return Err(Error::InvalidArgument(
                "only keys on curve P-256 are supported".to_owned(),
            ));
        }

        let insecure = insecure_allowlist.iter().any(|known| base_url.starts_with(known));
        if insecure {
            log::warn!("not verifying TLS certificates for log {}", url);
        }
        let http_client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(Error::NetIO)?;

        Ok(Log {
            base_url: url,
            pub_key,
            http_client,
        })
    }

    pub fn base_url(&self) -> &reqwest::Url {
        &self.base_url
    }

    /// `GET <root>/ct/v1/get-sth`, with signature verification.
    pub async fn get_signed_tree_head(&self, timeout: Duration) -> Result<SignedTreeHead, Error> {
        let url = self
            .base_url
            .join("ct/v1/get-sth")
            .map_err(|e| Error::InvalidArgument(format!("unable to build get-sth url: {}", e)))?;
        let body = self.get_body_capped(url, timeout, MAX_STH_BODY).await?;

        let sth: jsons::Sth = serde_json::from_slice(&body)
            .map_err(|e| Error::MalformedResponseBody(format!("invalid get-sth JSON: {}", e)))?;

        let root_hash_vec = decode_base64_field("sha256_root_hash", &sth.sha256_root_hash)?;
        let root_hash: [u8; 32] = root_hash_vec
            .try_into()
            .map_err(|_| Error::MalformedResponseBody("sha256_root_hash is not 32 bytes".to_owned()))?;
        let signature = decode_base64_field("tree_head_signature", &sth.tree_head_signature)?;

        SignedTreeHead::parse_and_verify(sth.tree_size, sth.timestamp, root_hash, &signature, &self.pub_key)
    }

    /// `GET <root>/ct/v1/get-entries?start=S&end=E`. Exactly one HTTP round
    /// trip; the server is permitted to return a prefix of `[start, end]`.
    pub async fn get_entries(&self, start: u64, end: u64, timeout: Duration) -> Result<Vec<RawEntry>, Error> {
        let mut url = self
            .base_url
            .join("ct/v1/get-entries")
            .map_err(|e| Error::InvalidArgument(format!("unable to build get-entries url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("start", &start.to_string())
            .append_pair("end", &end.to_string());

        let body = self.get_body_capped(url, timeout, MAX_ENTRIES_BODY).await?;
        let parsed: jsons::GetEntries = serde_json::from_slice(&body)
            .map_err(|e| Error::MalformedResponseBody(format!("invalid get-entries JSON: {}", e)))?;

        parsed.entries.iter().map(RawEntry::try_from).collect()
    }

    async fn get_body_capped(&self, url: reqwest::Url, timeout: Duration, max: u64) -> Result<Vec<u8>, Error> {
        let resp = self.http_client.get(url).timeout(timeout).send().await?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(Error::InvalidResponseStatus(resp.status()));
        }
        let content_length = resp.content_length().ok_or(Error::MissingContentLength)?;
        if content_length > max {
            return Err(Error::ResponseTooLarge {
                got: content_length,
                max,
            });
        }
        let body = resp.bytes().await?;
        if body.len() as u64 > max {
            return Err(Error::ResponseTooLarge {
                got: body.len() as u64,
                max,
            });
        }
        Ok(body.to_vec())
    }
}
