//! The language-model trait the runtime consumes
//!
//! Implementations wrap a concrete provider (hosted HTTP API, local
//! runtime). Two entry points: [`LanguageModel::generate`] for a complete
//! response and [`LanguageModel::stream_generate`] for token streaming with
//! cooperative interruption.

use crate::error::Result;
use crate::llm::config::GenerateOptions;
use crate::llm::types::Message;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// A stream of content chunks from the model
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Examined against the accumulated buffer after every chunk; returning
/// `true` asks the provider to stop producing promptly and close the stream.
pub type InterruptPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Chat-based language model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a complete assistant message. The returned message must have
    /// non-empty content.
    async fn generate(&self, messages: &[Message], options: &GenerateOptions) -> Result<Message>;

    /// Stream content chunks, honoring `interrupt`: once the predicate
    /// returns `true` on the accumulated output, the stream must end
    /// promptly. Pass `None` to stream to completion.
    async fn stream_generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        interrupt: Option<InterruptPredicate>,
    ) -> Result<TokenStream>;
}
