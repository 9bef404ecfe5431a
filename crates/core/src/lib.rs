//! Shared building blocks for the genbus workers.
//!
//! Holds the small set of seams every other crate leans on: connecting a
//! client, running a long-lived task, and retrying startup operations.

/// Connection trait implemented by broker and collaborator clients.
pub mod client;

/// Retry configuration with exponential backoff for startup operations.
pub mod retry;

/// Long-running task abstraction.
pub mod task {
    /// Trait implemented by every worker the orchestrator supervises.
    pub mod runner;
}
