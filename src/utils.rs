//! Utility functions for the lanemate service

use crate::types::UserId;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique correlation ID for outbound messages
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Pick the dispatcher shard that owns a user
///
/// Chat ids can be negative, so this uses euclidean remainder.
pub fn shard_for(user_id: UserId, shard_count: usize) -> usize {
    if shard_count == 0 {
        return 0;
    }
    user_id.rem_euclid(shard_count as i64) as usize
}

/// Lossy UTF-8 preview of a raw message body for error logs
pub fn payload_preview(data: &[u8], max_len: usize) -> String {
    let preview_len = std::cmp::min(max_len, data.len());
    String::from_utf8_lossy(&data[..preview_len]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        let id1 = generate_correlation_id();
        let id2 = generate_correlation_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_shard_for_is_stable_and_in_range() {
        assert_eq!(shard_for(100, 8), shard_for(100, 8));
        assert_eq!(shard_for(100, 8), 4);
        assert!(shard_for(-1001234567890, 8) < 8);
        assert_eq!(shard_for(5, 0), 0);
    }

    #[test]
    fn test_payload_preview_truncates() {
        assert_eq!(payload_preview(b"hello world", 5), "hello");
        assert_eq!(payload_preview(b"hi", 100), "hi");
    }
}
