//! Messaging-platform layer for Coral.
//!
//! Defines the canonical inbound message contract, webhook signature
//! verification, per-platform payload normalization, and the outbound reply
//! dispatcher for WhatsApp, Messenger, Instagram, and Telegram channels.
//!
//! ```rust
//! # fn main() {
//! use coral_channels::{normalize_webhook_payload, Platform};
//!
//! let raw = r#"{
//!   "update_id": 42,
//!   "message": {
//!     "message_id": 7,
//!     "date": 1700000000,
//!     "text": "hello",
//!     "chat": { "id": 99, "type": "private" },
//!     "from": { "id": 12, "username": "operator" }
//!   }
//! }"#;
//!
//! let items = normalize_webhook_payload(Platform::Telegram, raw).expect("normalize");
//! let message = items[0].as_ref().expect("message");
//! assert_eq!(message.external_message_id, "7");
//! assert_eq!(message.text, "hello");
//! # }
//! ```

pub mod contract;
pub mod normalize;
pub mod outbound;
pub mod signature;

pub use contract::{
    validate_inbound_message, ChannelCredentials, InboundMessage, MessageAttachment, Platform,
};
pub use normalize::{
    normalize_webhook_payload, NormalizationError, NormalizationReasonCode, NormalizedItem,
};
pub use outbound::{
    DeliveryError, DeliveryReceipt, OutboundConfig, OutboundDispatcher, OutboundMode,
};
pub use signature::verify_webhook_signature;
