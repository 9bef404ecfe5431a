//! Message-bus workers.
//!
//! Two request-reply workers answer on the subject's reply address, one
//! pipeline worker enriches batches and forwards them downstream. Each worker
//! owns one subscription and implements [`genbus_core::task::runner::Runner`].

/// Chat reply suggestions.
pub mod chat;
/// Reply envelope and per-message error values.
pub mod envelope;
/// Monthly posts captioning stage.
pub mod pipeline;
/// Special day reminder notifications.
pub mod reminder;
/// Decode, validate, process and reply.
pub mod request_reply;
