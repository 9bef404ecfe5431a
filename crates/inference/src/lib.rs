//! Collaborator boundaries used by the genbus workers.
//!
//! Text generation and image captioning run in external model servers; this
//! crate holds the HTTP clients for them, the prompt templates fed to the
//! generator and the helpers that clean chat input and parse model output.

/// Shared HTTP plumbing for the model servers.
pub mod backend;
/// Image captioning service.
pub mod caption;
/// Text generation service.
pub mod generation;
/// Monthly moment video captions.
pub mod moments;
/// Prompt template rendering.
pub mod prompt;
/// Chat input cleaning and model output parsing.
pub mod text;
