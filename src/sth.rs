//! Parsing and cryptographic verification of a log's Signed Tree Head.
//!
//! See RFC 5246 §4.7 (`DigitallySigned`) and §3.5 of
//! `draft-laurie-pki-sunlight` for the two nested wire formats this module
//! has to unpick before it can call into `openssl`.

use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use openssl::pkey::{PKey, Public};

use crate::utils::sha256;
use crate::Error;

const LOG_VERSION: u8 = 0;
const SIGNATURE_TYPE_TREE_HASH: u8 = 1;
const HASH_ALGO_SHA256: u8 = 4;
const SIG_ALGO_ECDSA: u8 = 3;

/// A parsed, signature-verified Signed Tree Head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTreeHead {
    pub size: u64,
    pub timestamp: u64,
    pub root_hash: [u8; 32],
}

impl SignedTreeHead {
    /// Parse the raw `tree_head_signature` bytes and verify them against
    /// `pub_key`, returning the verified STH.
    ///
    /// `signature` is the full `DigitallySigned` blob: `hash_algo(1) ||
    /// sig_algo(1) || len(2, BE) || ASN.1 DER SEQUENCE{r,s}`.
    pub fn parse_and_verify(
        size: u64,
        timestamp: u64,
        root_hash: [u8; 32],
        signature: &[u8],
        pub_key: &PKey<Public>,
    ) -> Result<Self, Error> {
        if signature.len() < 4 {
            return Err(Error::InvalidSignature("signature truncated".to_owned()));
        }
        if signature[0] != HASH_ALGO_SHA256 {
            return Err(Error::InvalidSignature("unknown hash function".to_owned()));
        }
        if signature[1] != SIG_ALGO_ECDSA {
            return Err(Error::InvalidSignature("unknown signature algorithm".to_owned()));
        }
        let declared_len = u16::from_be_bytes([signature[2], signature[3]]) as usize;
        let body = &signature[4..];
        if body.len() != declared_len {
            return Err(Error::InvalidSignature("signature truncated".to_owned()));
        }

        let (r, s) = parse_ecdsa_der_signature(body)?;
        let r = BigNum::from_slice(&r)
            .map_err(|e| Error::InvalidSignature(format!("invalid r: {}", e)))?;
        let s = BigNum::from_slice(&s)
            .map_err(|e| Error::InvalidSignature(format!("invalid s: {}", e)))?;
        let sig = EcdsaSig::from_private_components(r, s)
            .map_err(|e| Error::InvalidSignature(format!("invalid signature components: {}", e)))?;

        let signed = signed_payload(timestamp, size, &root_hash);
        let digest = sha256(&signed);

        let ec_key = pub_key
            .ec_key()
            .map_err(|e| Error::InvalidSignature(format!("not an EC key: {}", e)))?;
        let ok = sig
            .verify(&digest, &ec_key)
            .map_err(|e| Error::InvalidSignature(format!("verification error: {}", e)))?;
        if !ok {
            return Err(Error::InvalidSignature("signature verification failed".to_owned()));
        }

        Ok(SignedTreeHead {
            size,
            timestamp,
            root_hash,
        })
    }
}

/// The 50-byte signed payload: `version(1) || sig_type(1) || timestamp(8,
/// BE) || tree_size(8, BE) || root_hash(32)`.
fn signed_payload(timestamp: u64, tree_size: u64, root_hash: &[u8; 32]) -> [u8; 50] {
    let mut buf = [0u8; 50];
    buf[0] = LOG_VERSION;
    buf[1] = SIGNATURE_TYPE_TREE_HASH;
    buf[2..10].copy_from_slice(&timestamp.to_be_bytes());
    buf[10..18].copy_from_slice(&tree_size.to_be_bytes());
    buf[18..50].copy_from_slice(root_hash);
    buf
}

/// Read one DER TLV from the front of `buf`, returning `(tag, content,
/// remainder)`. Only supports definite-length encodings with length fields
/// up to 8 bytes, which is all that ECDSA signatures ever need.
fn read_der_tlv(buf: &[u8]) -> Result<(u8, &[u8], &[u8]), Error> {
    if buf.len() < 2 {
        return Err(Error::InvalidSignature("signature truncated".to_owned()));
    }
    let tag = buf[0];
    let len_byte = buf[1];
    let (length, header_len): (usize, usize) = if len_byte & 0x80 == 0 {
        (len_byte as usize, 2)
    } else {
        let num_len_bytes = (len_byte & 0x7f) as usize;
        if num_len_bytes == 0 || num_len_bytes > 8 {
            return Err(Error::InvalidSignature("unsupported DER length encoding".to_owned()));
        }
        if buf.len() < 2 + num_len_bytes {
            return Err(Error::InvalidSignature("signature truncated".to_owned()));
        }
        let mut length: usize = 0;
        for &b in &buf[2..2 + num_len_bytes] {
            length = (length << 8) | b as usize;
        }
        (length, 2 + num_len_bytes)
    };
    if buf.len() < header_len + length {
        return Err(Error::InvalidSignature("signature truncated".to_owned()));
    }
    Ok((tag, &buf[header_len..header_len + length], &buf[header_len + length..]))
}

/// Parse `SEQUENCE { r INTEGER, s INTEGER }`, rejecting any trailing bytes
/// after the sequence.
fn parse_ecdsa_der_signature(buf: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Error> {
    const TAG_SEQUENCE: u8 = 0x30;
    const TAG_INTEGER: u8 = 0x02;

    let (tag, content, rest) = read_der_tlv(buf)?;
    if tag != TAG_SEQUENCE {
        return Err(Error::InvalidSignature("expected a DER SEQUENCE".to_owned()));
    }
    if !rest.is_empty() {
        return Err(Error::InvalidSignature("trailing garbage after signature".to_owned()));
    }

    let (r_tag, r, rest) = read_der_tlv(content)?;
    if r_tag != TAG_INTEGER {
        return Err(Error::InvalidSignature("expected INTEGER r".to_owned()));
    }
    let (s_tag, s, rest) = read_der_tlv(rest)?;
    if s_tag != TAG_INTEGER {
        return Err(Error::InvalidSignature("expected INTEGER s".to_owned()));
    }
    if !rest.is_empty() {
        return Err(Error::InvalidSignature("trailing garbage after signature".to_owned()));
    }

    Ok((r.to_vec(), s.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;

    fn gen_keypair() -> (PKey<openssl::pkey::Private>, PKey<Public>) {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = EcKey::generate(&group).unwrap();
        let private = PKey::from_ec_key(key.clone()).unwrap();
        let pub_only = EcKey::from_public_key(&group, key.public_key()).unwrap();
        let public = PKey::from_ec_key(pub_only).unwrap();
        (private, public)
    }

    fn sign_payload(private: &PKey<openssl::pkey::Private>, timestamp: u64, size: u64, root_hash: &[u8; 32]) -> Vec<u8> {
        let signed = signed_payload(timestamp, size, root_hash);
        let digest = sha256(&signed);
        let ec_key = private.ec_key().unwrap();
        let sig = EcdsaSig::sign(&digest, &ec_key).unwrap();
        let der = sig.to_der().unwrap();
        let mut out = vec![HASH_ALGO_SHA256, SIG_ALGO_ECDSA];
        out.extend_from_slice(&(der.len() as u16).to_be_bytes());
        out.extend_from_slice(&der);
        out
    }

    #[test]
    fn known_good_signature_verifies() {
        let (private, public) = gen_keypair();
        let root_hash = sha256(b"leaf0-bytes-under-0x00-prefix");
        let sig = sign_payload(&private, 1519962000000, 1, &root_hash);
        let sth = SignedTreeHead::parse_and_verify(1, 1519962000000, root_hash, &sig, &public).unwrap();
        assert_eq!(sth.size, 1);
        assert_eq!(sth.root_hash, root_hash);
    }

    #[test]
    fn flipped_root_hash_bit_fails() {
        let (private, public) = gen_keypair();
        let mut root_hash = sha256(b"leaf0-bytes-under-0x00-prefix");
        let sig = sign_payload(&private, 1519962000000, 1, &root_hash);
        root_hash[0] ^= 1;
        let result = SignedTreeHead::parse_and_verify(1, 1519962000000, root_hash, &sig, &public);
        assert!(result.is_err());
    }

    #[test]
    fn signature_truncated_at_three_bytes() {
        let (_, public) = gen_keypair();
        let sig = [HASH_ALGO_SHA256, SIG_ALGO_ECDSA, 0u8];
        let err = SignedTreeHead::parse_and_verify(1, 0, [0u8; 32], &sig, &public).unwrap_err();
        assert!(matches!(err, Error::InvalidSignature(ref d) if d == "signature truncated"));
    }

    #[test]
    fn unknown_hash_algorithm_rejected() {
        let (_, public) = gen_keypair();
        let sig = [0x02u8, SIG_ALGO_ECDSA, 0, 2, 0x30, 0x00];
        let err = SignedTreeHead::parse_and_verify(1, 0, [0u8; 32], &sig, &public).unwrap_err();
        assert!(matches!(err, Error::InvalidSignature(ref d) if d == "unknown hash function"));
    }

    #[test]
    fn trailing_garbage_after_der_sequence_rejected() {
        let (private, public) = gen_keypair();
        let root_hash = sha256(b"x");
        let mut sig = sign_payload(&private, 1, 1, &root_hash);
        // Append one extra trailing byte to the DER body and fix up the declared length.
        sig.push(0xff);
        let new_len = (sig.len() - 4) as u16;
        sig[2..4].copy_from_slice(&new_len.to_be_bytes());
        let err = SignedTreeHead::parse_and_verify(1, 1, root_hash, &sig, &public).unwrap_err();
        assert!(matches!(err, Error::InvalidSignature(ref d) if d == "trailing garbage after signature"));
    }
}
