//! Fragment extraction
//!
//! [`FragmentExtractor`] is the boundary to the remote reasoning model. The
//! shipped [`LlmFragmentExtractor`] prompts a chat model and parses its JSON
//! reply with [`parse_extraction_response`].

mod adapter;
mod llm_extractor;

pub use adapter::{FragmentExtractor, parse_extraction_response};
pub use llm_extractor::LlmFragmentExtractor;
