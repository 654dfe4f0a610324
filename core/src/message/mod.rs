// Message module - record types and the stored wire forms

pub mod types;
pub mod codec;

pub use types::{DispositionState, Message, MessageState, StateUpdate};
pub use codec::{decode_log, decode_messages, decode_record, encode_log, encode_record, StoredLog};
