//! NATS integration for the genbus workers.
//!
//! Owns the single process-wide broker connection and builds the two delivery
//! modes the workers rely on: plain core NATS subscriptions (at-most-once, no
//! acknowledgment) and JetStream durable consumers (at-least-once, explicit
//! acknowledgment).

/// Broker connection, credentials and the shared connection manager.
pub mod client;

/// Broker-independent representation of an inbound message.
pub mod message;

/// Core and JetStream publishing.
pub mod publisher;

/// Plain core NATS subscriptions bound to a handler.
pub mod subscriber;

/// JetStream specific functionality for durable messaging.
pub mod jetstream {
    /// Configuration structures for streams and durable consumers.
    pub mod config;
    /// Stream provisioning.
    pub mod stream;
    /// Durable consumer subscriptions with explicit acknowledgment.
    pub mod subscriber;
}
