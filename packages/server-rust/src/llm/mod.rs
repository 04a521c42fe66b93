//! Model clients: the handle use cases resolve from the dependency graph,
//! and the concrete streaming providers behind it.

pub mod ollama;

use std::sync::Arc;

use docintake_core::{ModelStreamProvider, PromptMessage, StreamError};
use tokio_util::sync::CancellationToken;

use crate::streaming::{ConsumerOptions, StreamConsumer};

pub use ollama::{ModelConfig, OllamaProvider};

/// A streaming provider plus the consumption policy applied to every stream
/// opened through it.
#[derive(Clone)]
pub struct ModelClient {
    provider: Arc<dyn ModelStreamProvider>,
    options: ConsumerOptions,
}

impl ModelClient {
    #[must_use]
    pub fn new(provider: Arc<dyn ModelStreamProvider>, options: ConsumerOptions) -> Self {
        Self { provider, options }
    }

    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    #[must_use]
    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    /// Opens a completion stream for `messages`.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::UnableToCreateStream` if the provider refuses,
    /// or `StreamError::Cancelled` if `cancel` fires first.
    pub async fn open(
        &self,
        messages: &[PromptMessage],
        cancel: CancellationToken,
    ) -> Result<StreamConsumer, StreamError> {
        StreamConsumer::open(self.provider.as_ref(), messages, self.options.clone(), cancel).await
    }
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("provider", &self.provider.name())
            .field("options", &self.options)
            .finish()
    }
}
