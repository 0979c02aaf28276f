//! Structs for parsing server responses (`draft-laurie-pki-sunlight` / RFC 6962 §4).

use serde::Deserialize;

#[derive(Deserialize, Clone, Debug)]
pub struct Sth {
    pub tree_size: u64,
    pub timestamp: u64,
    pub sha256_root_hash: String,
    pub tree_head_signature: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct GetEntries {
    #[serde(default)]
    pub entries: Vec<LeafEntry>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct LeafEntry {
    pub leaf_input: String,
    pub extra_data: String,
}
