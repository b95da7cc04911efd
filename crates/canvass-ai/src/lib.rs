//! canvass-ai: Text-generation provider clients
//!
//! This crate provides a common interface for calling text-generation
//! backends (OpenAI-compatible and Google Generative AI), a primary/secondary
//! fallback client with bounded retries, and structured-output parsing with
//! a repair pass for malformed model output.

pub mod client;
pub mod error;
pub mod providers;
pub mod structured;
pub mod types;

pub use client::{FallbackClient, RetryConfig};
pub use error::{Error, Result};
pub use providers::{ChatProvider, GoogleProvider, OpenAiProvider};
pub use structured::{OutputSchema, StructuredClient};
pub use types::*;
