//! `RawEntry`: the `{leaf_input, extra_data}` pair carried by `get-entries`,
//! and the DEFLATE-framed on-disk encoding used by [`crate::Archive`].

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::jsons;
use crate::utils::decode_base64_field;
use crate::Error;

/// Fixed, moderate compression level. Any level would do: decompression is
/// self-describing via the embedded inner lengths.
const COMPRESSION_LEVEL: u32 = 8;

/// A single log entry, opaque to everything above the archive layer.
/// `leaf_input` is the `MerkleTreeLeaf` TLS structure; `extra_data` carries
/// the certificate chain or pre-cert material and is never hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub leaf_input: Vec<u8>,
    pub extra_data: Vec<u8>,
}

impl TryFrom<&jsons::LeafEntry> for RawEntry {
    type Error = Error;

    fn try_from(entry: &jsons::LeafEntry) -> Result<Self, Error> {
        Ok(RawEntry {
            leaf_input: decode_base64_field("leaf_input", &entry.leaf_input)?,
            extra_data: decode_base64_field("extra_data", &entry.extra_data)?,
        })
    }
}

impl RawEntry {
    /// Serialize and DEFLATE-compress this entry into the plaintext-then-
    /// compressed form used inside an archive frame (everything after the
    /// outer `uint32` length prefix).
    pub(crate) fn to_compressed(&self) -> Result<Vec<u8>, Error> {
        let mut plain = Vec::with_capacity(8 + self.leaf_input.len() + self.extra_data.len());
        plain.extend_from_slice(&(self.leaf_input.len() as u32).to_le_bytes());
        plain.extend_from_slice(&self.leaf_input);
        plain.extend_from_slice(&(self.extra_data.len() as u32).to_le_bytes());
        plain.extend_from_slice(&self.extra_data);

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
        encoder
            .write_all(&plain)
            .map_err(|e| Error::ArchiveCorrupt(format!("compressing entry: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| Error::ArchiveCorrupt(format!("compressing entry: {}", e)))
    }

    /// Inverse of [`Self::to_compressed`].
    pub(crate) fn from_compressed(compressed: &[u8]) -> Result<Self, Error> {
        let mut plain = Vec::new();
        DeflateDecoder::new(compressed)
            .read_to_end(&mut plain)
            .map_err(|e| Error::ArchiveCorrupt(format!("decompressing entry: {}", e)))?;

        if plain.len() < 4 {
            return Err(Error::ArchiveCorrupt("entry frame truncated (leaf length)".to_owned()));
        }
        let leaf_len = u32::from_le_bytes(plain[0..4].try_into().unwrap()) as usize;
        let mut rest = &plain[4..];
        if rest.len() < leaf_len {
            return Err(Error::ArchiveCorrupt("entry frame truncated (leaf bytes)".to_owned()));
        }
        let leaf_input = rest[..leaf_len].to_vec();
        rest = &rest[leaf_len..];

        if rest.len() < 4 {
            return Err(Error::ArchiveCorrupt("entry frame truncated (extra length)".to_owned()));
        }
        let extra_len = u32::from_le_bytes(rest[0..4].try_into().unwrap()) as usize;
        let rest = &rest[4..];
        if rest.len() != extra_len {
            return Err(Error::ArchiveCorrupt("entry frame has trailing or missing bytes".to_owned()));
        }
        let extra_data = rest.to_vec();

        Ok(RawEntry { leaf_input, extra_data })
    }
}
