//! Relational persistence for Coral conversations.
//!
//! Defines the channel/agent/conversation/message records, the
//! `ConversationStore` trait the pipeline is injected with, and two backends:
//! a SQLite store for deployments and an in-memory store for tests. The
//! active-conversation uniqueness constraint lives here; concurrent creation
//! races are surfaced as `StoreError::UniqueViolation` so resolvers can
//! re-read the winning row.

mod memory;
mod records;
mod sqlite;
mod store;

pub use memory::MemoryStore;
pub use records::{
    AgentRecord, ChannelRecord, Conversation, ConversationStatus, MessageRecord, MessageSender,
    RecordStatus,
};
pub use sqlite::SqliteStore;
pub use store::{ConversationStore, StoreError};
