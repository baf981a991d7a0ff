//! Chat-completion access for extraction and research
//!
//! [`LlmClient`] talks to an OpenAI-compatible endpoint with model fallback.
//! Callers depend on the [`ChatCompleter`] seam instead.

mod client;
mod types;

pub use client::{ChatCompleter, LlmClient};
pub use types::{Completion, Prompt, ReplyFormat};
