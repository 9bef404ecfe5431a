//! Generative inference over NATS.
//!
//! Loads configuration, brings up the model server clients and the shared
//! broker connection, then runs the chat recommendation, reminder
//! notification and monthly posts workers next to a small HTTP surface.

/// Process orchestration.
pub mod app;
/// Application configuration.
pub mod config;
