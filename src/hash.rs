use std::hash::{Hash, Hasher};

use sha2::{Digest, Sha256};

pub fn hash_content(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Cheap fingerprint of already-normalized text for embedding cache validation.
pub fn fingerprint(text: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
