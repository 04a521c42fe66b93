//! Pull-based consumption of a provider's token stream.
//!
//! A [`StreamConsumer`] owns one opened [`TokenReader`] and hands out one
//! token per `next()` call. Transient read failures are retried in place with
//! the configured [`RetryPolicy`]; every other failure, an idle read, or
//! cancellation ends the sequence. Once terminal, the reader is released and
//! the consumer only yields `None`.

use std::time::Duration;

use docintake_core::{ModelStreamProvider, PromptMessage, StreamError, StreamToken, TokenReader};
use futures_util::stream::{self, Stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;

/// Tuning for a single stream consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Backoff applied to transient read failures.
    pub retry: RetryPolicy,
    /// Maximum time a single read may stay pending before the stream is
    /// considered stalled.
    pub idle_timeout: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

enum State {
    Open(Box<dyn TokenReader>),
    Terminated,
}

enum ReadOutcome {
    Token(StreamToken),
    End,
    Failed(StreamError),
}

/// Lazy, finite, non-restartable sequence of [`StreamToken`]s.
pub struct StreamConsumer {
    state: State,
    options: ConsumerOptions,
    cancel: CancellationToken,
    delivered: u64,
}

impl StreamConsumer {
    /// Opens a completion stream on `provider` and wraps it in a consumer.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::UnableToCreateStream` if the provider refuses to
    /// open the stream, or `StreamError::Cancelled` if `cancel` fires first.
    pub async fn open(
        provider: &dyn ModelStreamProvider,
        messages: &[PromptMessage],
        options: ConsumerOptions,
        cancel: CancellationToken,
    ) -> Result<Self, StreamError> {
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StreamError::Cancelled),
            opened = provider.stream(messages) => opened,
        };

        let reader = opened.map_err(|err| StreamError::UnableToCreateStream {
            cause: err.cause().to_string(),
        })?;

        debug!(provider = provider.name(), messages = messages.len(), "stream opened");
        Ok(Self::from_reader(reader, options, cancel))
    }

    /// Wraps an already-opened reader.
    #[must_use]
    pub fn from_reader(
        reader: Box<dyn TokenReader>,
        options: ConsumerOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state: State::Open(reader),
            options,
            cancel,
            delivered: 0,
        }
    }

    /// Number of tokens handed out so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Whether the consumer reached end-of-stream or a terminal failure.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, State::Terminated)
    }

    /// Pulls the next token.
    ///
    /// Returns `None` at end-of-stream and on every call after a terminal
    /// outcome. A returned `Err` is itself terminal.
    pub async fn next(&mut self) -> Option<Result<StreamToken, StreamError>> {
        let outcome = {
            let State::Open(reader) = &mut self.state else {
                return None;
            };
            read_with_retry(reader, &self.options, &self.cancel).await
        };

        match outcome {
            ReadOutcome::Token(token) => {
                self.delivered += 1;
                debug!(index = self.delivered, len = token.content.len(), "token received");
                Some(Ok(token))
            }
            ReadOutcome::End => {
                info!(delivered = self.delivered, "stream completed");
                self.terminate().await;
                None
            }
            ReadOutcome::Failed(err) => {
                warn!(delivered = self.delivered, error = %err, "stream terminated");
                self.terminate().await;
                Some(Err(err))
            }
        }
    }

    /// Adapts the consumer into a `futures` stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamToken, StreamError>> + Send {
        stream::unfold(self, |mut consumer| async move {
            consumer.next().await.map(|item| (item, consumer))
        })
    }

    async fn terminate(&mut self) {
        if let State::Open(mut reader) = std::mem::replace(&mut self.state, State::Terminated) {
            reader.release().await;
        }
    }
}

async fn read_with_retry(
    reader: &mut Box<dyn TokenReader>,
    options: &ConsumerOptions,
    cancel: &CancellationToken,
) -> ReadOutcome {
    let mut retries = 0u32;

    loop {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => return ReadOutcome::Failed(StreamError::Cancelled),
            read = tokio::time::timeout(options.idle_timeout, reader.read()) => read,
        };

        let err = match read {
            Ok(Ok(Some(token))) => return ReadOutcome::Token(token),
            Ok(Ok(None)) => return ReadOutcome::End,
            Ok(Err(err)) => err,
            Err(_elapsed) => {
                let timeout_ms = u64::try_from(options.idle_timeout.as_millis()).unwrap_or(u64::MAX);
                return ReadOutcome::Failed(StreamError::IdleTimeout { timeout_ms });
            }
        };

        if !err.is_transient() || !options.retry.allows(retries) {
            return ReadOutcome::Failed(StreamError::UnableToConsumeStream {
                cause: err.cause().to_string(),
                attempts: retries + 1,
            });
        }

        let delay = options.retry.delay_for(retries);
        retries += 1;
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        warn!(attempt = retries, delay_ms, error = %err, "stream read failed, retrying");

        tokio::select! {
            biased;
            () = cancel.cancelled() => return ReadOutcome::Failed(StreamError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use docintake_core::{ErrorCode, ReadError};
    use futures_util::StreamExt;

    use super::*;
    use crate::testing::{ScriptedProvider, ScriptedReader, Step};

    fn options(max_retries: u32) -> ConsumerOptions {
        ConsumerOptions {
            retry: RetryPolicy {
                base_interval: Duration::from_millis(10),
                max_interval: Duration::from_secs(1),
                max_retries,
                jitter: false,
            },
            idle_timeout: Duration::from_secs(5),
        }
    }

    async fn collect(consumer: &mut StreamConsumer) -> Vec<Result<StreamToken, StreamError>> {
        let mut items = Vec::new();
        while let Some(item) = consumer.next().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn yields_tokens_in_order_then_ends() {
        let reader = ScriptedReader::new(vec![
            Step::token("a"),
            Step::token("b"),
            Step::token("c"),
            Step::End,
        ]);
        let released = reader.released_flag();
        let mut consumer =
            StreamConsumer::from_reader(Box::new(reader), options(0), CancellationToken::new());

        let contents: Vec<String> = collect(&mut consumer)
            .await
            .into_iter()
            .map(|item| item.unwrap().content)
            .collect();

        assert_eq!(contents, vec!["a", "b", "c"]);
        assert_eq!(consumer.delivered(), 3);
        assert!(consumer.is_terminated());
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn not_restartable_after_end() {
        let reader = ScriptedReader::new(vec![Step::token("a"), Step::End, Step::token("late")]);
        let reads = reader.reads_counter();
        let mut consumer =
            StreamConsumer::from_reader(Box::new(reader), options(0), CancellationToken::new());

        assert!(consumer.next().await.is_some());
        assert!(consumer.next().await.is_none());
        assert!(consumer.next().await.is_none());
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pulls_lazily() {
        let reader = ScriptedReader::new(vec![Step::token("a"), Step::token("b"), Step::End]);
        let reads = reader.reads_counter();
        let mut consumer =
            StreamConsumer::from_reader(Box::new(reader), options(0), CancellationToken::new());

        assert_eq!(reads.load(Ordering::SeqCst), 0);
        consumer.next().await;
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_without_loss_or_duplication() {
        let reader = ScriptedReader::new(vec![
            Step::token("a"),
            Step::transient("connection reset"),
            Step::transient("connection reset"),
            Step::token("b"),
            Step::transient("timeout"),
            Step::token("c"),
            Step::End,
        ]);
        let mut consumer =
            StreamConsumer::from_reader(Box::new(reader), options(3), CancellationToken::new());

        let contents: Vec<String> = collect(&mut consumer)
            .await
            .into_iter()
            .map(|item| item.unwrap().content)
            .collect();

        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_attempts() {
        let reader = ScriptedReader::new(vec![
            Step::transient("1"),
            Step::transient("2"),
            Step::transient("3"),
            Step::token("ok"),
        ]);
        let mut consumer =
            StreamConsumer::from_reader(Box::new(reader), options(5), CancellationToken::new());

        let start = tokio::time::Instant::now();
        let token = consumer.next().await.unwrap().unwrap();
        assert_eq!(token.content, "ok");
        // 10 + 20 + 40
        assert_eq!(start.elapsed(), Duration::from_millis(70));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_yield_typed_error() {
        let reader = ScriptedReader::new(vec![
            Step::token("a"),
            Step::transient("down"),
            Step::transient("down"),
            Step::transient("down"),
            Step::token("never"),
        ]);
        let released = reader.released_flag();
        let mut consumer =
            StreamConsumer::from_reader(Box::new(reader), options(2), CancellationToken::new());

        assert_eq!(consumer.next().await.unwrap().unwrap().content, "a");
        let err = consumer.next().await.unwrap().unwrap_err();
        assert_eq!(
            err,
            StreamError::UnableToConsumeStream {
                cause: "down".to_string(),
                attempts: 3,
            }
        );
        assert_eq!(err.code(), ErrorCode::UnableToConsumeStream);
        assert!(consumer.next().await.is_none());
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let reader = ScriptedReader::new(vec![Step::Fail(ReadError::Fatal("bad frame".into()))]);
        let reads = reader.reads_counter();
        let mut consumer =
            StreamConsumer::from_reader(Box::new(reader), options(5), CancellationToken::new());

        let err = consumer.next().await.unwrap().unwrap_err();
        assert!(matches!(err, StreamError::UnableToConsumeStream { attempts: 1, .. }));
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_read_hits_idle_timeout() {
        let reader = ScriptedReader::new(vec![Step::token("a"), Step::Stall]);
        let mut consumer = StreamConsumer::from_reader(
            Box::new(reader),
            ConsumerOptions {
                idle_timeout: Duration::from_millis(250),
                ..options(0)
            },
            CancellationToken::new(),
        );

        assert!(consumer.next().await.unwrap().is_ok());
        let err = consumer.next().await.unwrap().unwrap_err();
        assert_eq!(err, StreamError::IdleTimeout { timeout_ms: 250 });
    }

    #[tokio::test]
    async fn cancellation_terminates_and_releases_reader() {
        let reader = ScriptedReader::new(vec![Step::token("a"), Step::Stall]);
        let released = reader.released_flag();
        let cancel = CancellationToken::new();
        let mut consumer =
            StreamConsumer::from_reader(Box::new(reader), options(0), cancel.clone());

        assert!(consumer.next().await.unwrap().is_ok());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = consumer.next().await.unwrap().unwrap_err();
        assert_eq!(err, StreamError::Cancelled);
        assert!(released.load(Ordering::SeqCst));
        assert!(consumer.next().await.is_none());
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn open_failure_is_unable_to_create_stream() {
        let provider = ScriptedProvider::failing("model unavailable");
        let result = StreamConsumer::open(
            &provider,
            &[PromptMessage::user("hi")],
            options(0),
            CancellationToken::new(),
        )
        .await;

        let Err(err) = result else {
            panic!("open should fail");
        };
        assert_eq!(
            err,
            StreamError::UnableToCreateStream {
                cause: "model unavailable".to_string()
            }
        );
    }

    #[tokio::test]
    async fn open_after_cancel_is_cancelled() {
        let provider = ScriptedProvider::new(vec![Step::token("a")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = StreamConsumer::open(&provider, &[], options(0), cancel).await;
        assert!(matches!(result, Err(StreamError::Cancelled)));
        assert_eq!(provider.opened(), 0);
    }

    #[tokio::test]
    async fn into_stream_yields_same_sequence() {
        let provider = ScriptedProvider::new(vec![Step::token("x"), Step::token("y"), Step::End]);
        let consumer =
            StreamConsumer::open(&provider, &[], options(0), CancellationToken::new())
                .await
                .unwrap();

        let items: Vec<_> = consumer.into_stream().collect().await;
        let contents: Vec<_> = items.into_iter().map(|i| i.unwrap().content).collect();
        assert_eq!(contents, vec!["x", "y"]);
    }
}
