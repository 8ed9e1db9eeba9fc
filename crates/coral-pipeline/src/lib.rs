//! Inbound message processing pipeline for Coral.
//!
//! Webhook deliveries flow through signature verification, normalization,
//! idempotent conversation resolution, bounded context assembly with
//! retrieval, provider generation, durable persistence with real-time
//! fan-out, and outbound reply delivery. Every stage after normalization
//! reports per-message results so one failing item never aborts its
//! siblings.

pub mod broadcast;
pub mod context;
pub mod error;
pub mod generate;
pub mod memory;
pub mod pipeline;
pub mod resolver;

pub use broadcast::{
    Broadcaster, ConversationEvent, ConversationEventKind, LocalBroadcaster,
};
pub use context::{ContextAssembler, ContextConfig, MessageContext};
pub use error::PipelineError;
pub use generate::{GeneratedReply, GenerationDefaults, ProviderRegistry, ResponseGenerator};
pub use memory::{
    ConversationCache, InProcessConversationCache, MemoryRole, MemoryTurn, WindowLimits,
};
pub use pipeline::{
    MessagePipeline, PipelineConfig, ProcessMessageRequest, ProcessedError, ProcessedMessage,
};
pub use resolver::{ConversationResolver, ResolvedConversation};
