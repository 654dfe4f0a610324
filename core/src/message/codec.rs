// Record codec - the JSON wire forms kept in conversation logs
//
// A stored log is a JSON array of strings, each string one serialized
// message record. The double encoding is the on-disk contract: the outer
// array is what lives under the conversation key, the inner records are
// revived one by one.

use super::types::Message;
use anyhow::{Context, Result};

/// A conversation log as stored: one record string per message, oldest first
pub type StoredLog = Vec<String>;

/// Serialize a message to its stored record form
pub fn encode_record(msg: &Message) -> Result<String> {
    let record = serde_json::to_string(msg).context("Failed to serialize message record")?;
    Ok(record)
}

/// Revive a message from its stored record form
pub fn decode_record(record: &str) -> Result<Message> {
    let msg: Message =
        serde_json::from_str(record).context("Failed to parse message record")?;
    Ok(msg)
}

/// Serialize a log to the bytes kept under its conversation key
pub fn encode_log(log: &StoredLog) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(log).context("Failed to serialize conversation log")?;
    Ok(bytes)
}

/// Parse stored bytes back into a log of record strings
pub fn decode_log(bytes: &[u8]) -> Result<StoredLog> {
    let log: StoredLog =
        serde_json::from_slice(bytes).context("Failed to parse conversation log")?;
    Ok(log)
}

/// Revive every record of a log, oldest first
pub fn decode_messages(log: &StoredLog) -> Result<Vec<Message>> {
    log.iter()
        .enumerate()
        .map(|(i, record)| {
            decode_record(record).with_context(|| format!("Bad record at position {}", i))
        })
        .collect()
}
