/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `tasks`: task:{task_id} -> Task (JSON)
/// - `metadata`: meta:{key} -> value (string)
///
/// Task ids are UUIDv7 in their hyphenated lowercase form, so the byte order
/// of `task:` keys is creation order.
use crate::task::TaskId;

pub const TASK_PREFIX: &[u8] = b"task:";

/// Encode a task key: task:{task_id}
pub fn encode_task_key(id: &TaskId) -> Vec<u8> {
    format!("task:{}", id).into_bytes()
}

/// Decode a task key: task:{task_id} -> task_id
pub fn decode_task_key(key: &[u8]) -> Option<TaskId> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("task:")?.parse().ok()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}
