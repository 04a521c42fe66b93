use async_trait::async_trait;

use crate::error::ReadError;
use crate::types::{PromptMessage, StreamToken};

/// Pull side of an opened provider stream.
///
/// Each `read` yields the next token, `Ok(None)` once the provider signals
/// completion, or a classified failure. Implementations must not skip or
/// duplicate tokens when a read is re-attempted after a transient failure.
#[async_trait]
pub trait TokenReader: Send {
    async fn read(&mut self) -> Result<Option<StreamToken>, ReadError>;

    /// Releases the underlying connection. Called once when the consumer
    /// reaches a terminal state. Default is a no-op.
    async fn release(&mut self) {}
}

/// A language-model client that can stream a completion.
#[async_trait]
pub trait ModelStreamProvider: Send + Sync {
    /// Opens a completion stream for `messages`.
    async fn stream(&self, messages: &[PromptMessage]) -> Result<Box<dyn TokenReader>, ReadError>;

    /// Short provider label for logs (e.g. `"ollama"`).
    fn name(&self) -> &'static str;
}
