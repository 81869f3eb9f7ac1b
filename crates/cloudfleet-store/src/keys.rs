//! Key encoding utilities for `RocksDB`.
//!
//! Record keys are the 16 id bytes. State index keys are the state name, a
//! zero separator, then the id bytes, so a prefix scan over one state never
//! matches a longer state name sharing the same prefix.

use cloudfleet_core::ResourceId;

const SEPARATOR: u8 = 0x00;
const ID_LEN: usize = 16;

/// Encode a record key (just the id bytes).
#[must_use]
pub fn resource_key(id: &ResourceId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Encode a state index key: `state || 0x00 || id`.
#[must_use]
pub fn state_index_key(state: &str, id: &ResourceId) -> Vec<u8> {
    let mut key = state_prefix(state);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Encode a state prefix for scanning all records in one state.
#[must_use]
pub fn state_prefix(state: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(state.len() + 1 + ID_LEN);
    key.extend_from_slice(state.as_bytes());
    key.push(SEPARATOR);
    key
}

/// Extract the id from a state index key, or `None` if the key is malformed.
#[must_use]
pub fn extract_id_from_state_key(key: &[u8]) -> Option<ResourceId> {
    let split = key.len().checked_sub(ID_LEN)?;
    if split == 0 || key[split - 1] != SEPARATOR {
        return None;
    }
    let bytes: [u8; ID_LEN] = key[split..].try_into().ok()?;
    Some(ResourceId::from_bytes(bytes))
}
