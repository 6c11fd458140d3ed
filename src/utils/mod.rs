pub mod clock;
pub mod config;

use std::hash::Hasher;

/// Hash a string using xxHash64, case-insensitively.
pub fn hash_string(s: &str) -> u64 {
    let mut hasher = twox_hash::XxHash64::default();
    hasher.write(s.to_lowercase().as_bytes());
    hasher.finish()
}

/// Key identifying "the same interaction" for double-fire collapsing.
pub fn interaction_key(user_id: &str, item_id: &str, interaction_type: &str) -> u64 {
    let mut hasher = twox_hash::XxHash64::default();
    hasher.write(user_id.as_bytes());
    hasher.write_u8(0);
    hasher.write(item_id.as_bytes());
    hasher.write_u8(0);
    hasher.write(interaction_type.as_bytes());
    hasher.finish()
}
