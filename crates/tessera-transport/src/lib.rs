//! # tessera-transport
//!
//! Message protocol between makers, resolvers and the relayer.
//!
//! Every message travels in an [`Envelope`](wire::Envelope) carrying a
//! sender-chosen id and, for responses, the id of the request it answers.
//! Envelopes are serialized as one JSON object per line over a TCP stream.
//!
//! ## Modules
//!
//! - [`messages`] — Tagged message kinds and their payloads
//! - [`wire`] — Envelope and the newline-delimited JSON codec
//!
//! ## Wire format
//!
//! ```text
//! {"id":7,"reply_to":3,"message":{"kind":"ORDER_ACCEPTED","payload":{...}}}\n
//! ```
//!
//! Byte fields are lowercase hex without prefix; amounts are decimal strings.

pub mod messages;
pub mod wire;

pub use messages::{Message, Rejection};
pub use wire::Envelope;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// JSON deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Protocol violation (oversized line, missing correlation, etc.).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Underlying stream error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
