//! Left-fold reduction of a token sequence into one value.

use std::fmt::Display;
use std::future::Future;

use docintake_core::{StreamError, StreamToken};

use super::consumer::StreamConsumer;

/// Combine function of the canonical concatenating sink.
pub type ConcatFn = fn(StreamToken, &StreamToken) -> anyhow::Result<StreamToken>;

/// A sink that concatenates token content, starting from the empty token.
pub type ConcatSink = FoldingSink<StreamToken, ConcatFn>;

/// Reduces tokens into an accumulator with a caller-supplied `combine`.
///
/// `combine` runs exactly once per pushed token, in push order. The first
/// failure discards the accumulator and every later push is rejected.
pub struct FoldingSink<A, F> {
    accumulator: Option<A>,
    combine: F,
    applied: usize,
}

impl<A, F> FoldingSink<A, F>
where
    F: FnMut(A, &StreamToken) -> anyhow::Result<A>,
{
    #[must_use]
    pub fn new(initial: A, combine: F) -> Self {
        Self {
            accumulator: Some(initial),
            combine,
            applied: 0,
        }
    }

    /// Builds the initial accumulator with `init`.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::UnableToCreateSink` if `init` fails.
    pub fn try_new<E, I>(init: I, combine: F) -> Result<Self, StreamError>
    where
        I: FnOnce() -> Result<A, E>,
        E: Display,
    {
        let initial = init().map_err(|err| StreamError::UnableToCreateSink {
            cause: err.to_string(),
        })?;
        Ok(Self::new(initial, combine))
    }

    /// Folds one token into the accumulator.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::UnableToConsumeStream` if `combine` fails, or if
    /// an earlier push already failed.
    pub fn push(&mut self, token: &StreamToken) -> Result<(), StreamError> {
        let Some(accumulated) = self.accumulator.take() else {
            return Err(StreamError::UnableToConsumeStream {
                cause: "sink already failed".to_string(),
                attempts: 0,
            });
        };

        self.applied += 1;
        match (self.combine)(accumulated, token) {
            Ok(next) => {
                self.accumulator = Some(next);
                Ok(())
            }
            Err(err) => Err(StreamError::UnableToConsumeStream {
                cause: err.to_string(),
                attempts: 1,
            }),
        }
    }

    /// How many times `combine` has been applied.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Returns the accumulated value.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::UnableToConsumeStream` if a push failed.
    pub fn finish(self) -> Result<A, StreamError> {
        self.accumulator
            .ok_or_else(|| StreamError::UnableToConsumeStream {
                cause: "sink already failed".to_string(),
                attempts: 0,
            })
    }

    /// Drives `consumer` to completion, folding every token.
    ///
    /// # Errors
    ///
    /// Returns the first stream or combine failure.
    pub async fn drain(mut self, consumer: &mut StreamConsumer) -> Result<A, StreamError> {
        while let Some(item) = consumer.next().await {
            self.push(&item?)?;
        }
        self.finish()
    }

    /// Like [`drain`](Self::drain), but hands each token to `observer` before
    /// folding it. An observer failure stops consumption.
    ///
    /// # Errors
    ///
    /// Returns the first stream, observer, or combine failure.
    pub async fn drain_with<O, Fut, E>(
        mut self,
        consumer: &mut StreamConsumer,
        mut observer: O,
    ) -> Result<A, E>
    where
        O: FnMut(StreamToken) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<StreamError>,
    {
        while let Some(item) = consumer.next().await {
            let token = item?;
            observer(token.clone()).await?;
            self.push(&token)?;
        }
        Ok(self.finish()?)
    }
}

fn concat_tokens(accumulated: StreamToken, next: &StreamToken) -> anyhow::Result<StreamToken> {
    Ok(accumulated.concat(next))
}

impl ConcatSink {
    /// The canonical sink: content concatenation from the identity token.
    #[must_use]
    pub fn concat() -> Self {
        Self::new(StreamToken::identity(), concat_tokens as ConcatFn)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::streaming::{ConsumerOptions, RetryPolicy};
    use crate::testing::{ScriptedReader, Step};

    fn consumer(steps: Vec<Step>) -> StreamConsumer {
        let options = ConsumerOptions {
            retry: RetryPolicy {
                base_interval: Duration::from_millis(5),
                max_retries: 4,
                ..RetryPolicy::default()
            },
            idle_timeout: Duration::from_secs(5),
        };
        StreamConsumer::from_reader(
            Box::new(ScriptedReader::new(steps)),
            options,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn concat_sink_folds_abc() {
        let mut stream = consumer(vec![
            Step::token("a"),
            Step::token("b"),
            Step::token("c"),
            Step::End,
        ]);
        let result = ConcatSink::concat().drain(&mut stream).await.unwrap();
        assert_eq!(result.content, "abc");
    }

    #[tokio::test]
    async fn empty_stream_yields_identity() {
        let mut stream = consumer(vec![Step::End]);
        let result = ConcatSink::concat().drain(&mut stream).await.unwrap();
        assert_eq!(result, StreamToken::identity());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_invisible_to_the_fold() {
        let mut stream = consumer(vec![
            Step::token("a"),
            Step::transient("reset"),
            Step::token("b"),
            Step::transient("reset"),
            Step::transient("reset"),
            Step::token("c"),
            Step::End,
        ]);
        let mut calls = 0;
        let sink = FoldingSink::new(String::new(), |acc: String, token: &StreamToken| {
            calls += 1;
            Ok(acc + &token.content)
        });
        let result = sink.drain(&mut stream).await.unwrap();
        assert_eq!(result, "abc");
        assert_eq!(calls, 3);
    }

    #[test]
    fn combine_runs_once_per_token() {
        let mut calls = 0;
        let mut sink = FoldingSink::new(0usize, |acc, token: &StreamToken| {
            calls += 1;
            Ok(acc + token.content.len())
        });
        for part in ["ab", "c", "def"] {
            sink.push(&StreamToken::new(part)).unwrap();
        }
        assert_eq!(sink.applied(), 3);
        assert_eq!(sink.finish().unwrap(), 6);
        assert_eq!(calls, 3);
    }

    #[test]
    fn first_combine_failure_short_circuits() {
        let mut sink = FoldingSink::new(String::new(), |acc: String, token: &StreamToken| {
            if token.content == "bad" {
                anyhow::bail!("refused {}", token.content);
            }
            Ok(acc + &token.content)
        });

        sink.push(&StreamToken::new("ok")).unwrap();
        let err = sink.push(&StreamToken::new("bad")).unwrap_err();
        assert_eq!(
            err,
            StreamError::UnableToConsumeStream {
                cause: "refused bad".to_string(),
                attempts: 1,
            }
        );

        assert!(sink.push(&StreamToken::new("after")).is_err());
        assert_eq!(sink.applied(), 2);
        assert!(sink.finish().is_err());
    }

    #[test]
    fn try_new_reports_sink_creation_failure() {
        let result = FoldingSink::try_new(
            || Err::<String, _>("no buffer"),
            |acc: String, _token: &StreamToken| Ok(acc),
        );
        let Err(err) = result else {
            panic!("sink creation should fail");
        };
        assert_eq!(
            err,
            StreamError::UnableToCreateSink {
                cause: "no buffer".to_string()
            }
        );
    }

    #[tokio::test]
    async fn drain_propagates_stream_failure() {
        let mut stream = consumer(vec![
            Step::token("a"),
            Step::Fail(docintake_core::ReadError::Fatal("broken".into())),
        ]);
        let err = ConcatSink::concat().drain(&mut stream).await.unwrap_err();
        assert!(matches!(err, StreamError::UnableToConsumeStream { .. }));
    }

    #[tokio::test]
    async fn drain_with_observes_each_token_before_folding() {
        let mut stream = consumer(vec![Step::token("x"), Step::token("y"), Step::End]);
        let mut seen = Vec::new();
        let result = ConcatSink::concat()
            .drain_with(&mut stream, |token| {
                seen.push(token.content);
                async { Ok::<_, StreamError>(()) }
            })
            .await
            .unwrap();
        assert_eq!(result.content, "xy");
        assert_eq!(seen, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn drain_with_stops_on_observer_failure() {
        let mut stream = consumer(vec![Step::token("x"), Step::token("y"), Step::End]);
        let mut observed = 0;
        let err = ConcatSink::concat()
            .drain_with(&mut stream, |_token| {
                observed += 1;
                async { Err::<(), _>(StreamError::Cancelled) }
            })
            .await
            .unwrap_err();
        assert_eq!(err, StreamError::Cancelled);
        assert_eq!(observed, 1);
    }

    proptest! {
        #[test]
        fn fold_equals_left_fold_over_tokens(parts in proptest::collection::vec("[a-z]{0,6}", 0..32)) {
            let mut sink = FoldingSink::new(Vec::<String>::new(), |mut acc: Vec<String>, token: &StreamToken| {
                acc.push(token.content.clone());
                Ok(acc)
            });
            for part in &parts {
                sink.push(&StreamToken::new(part.as_str())).unwrap();
            }
            prop_assert_eq!(sink.applied(), parts.len());
            prop_assert_eq!(sink.finish().unwrap(), parts);
        }
    }
}
