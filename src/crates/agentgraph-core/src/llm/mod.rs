//! LLM integration contract
//!
//! agentgraph is an orchestration runtime, not an LLM client library: this
//! module defines the traits and message types the runtime consumes, and
//! concrete providers (HTTP clients for hosted models, local runtimes) are
//! implemented by the embedding application against [`LanguageModel`].

pub mod config;
pub mod traits;
pub mod types;

pub use config::GenerateOptions;
pub use traits::{InterruptPredicate, LanguageModel, TokenStream};
pub use types::{Message, MessageRole, ToolCallRequest};
