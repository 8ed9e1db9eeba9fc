//! Foundational low-level utilities shared across Coral crates.
//!
//! Provides time helpers and identifier minting used by store rows,
//! pipeline results, and broadcast events.

pub mod ids;
pub mod time_utils;

pub use ids::{new_conversation_id, new_event_id, new_message_id};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms};
