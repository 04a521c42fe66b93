//! Scripted provider and reader used by unit tests across the crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use docintake_core::{ModelStreamProvider, PromptMessage, ReadError, StreamToken, TokenReader};
use parking_lot::Mutex;

/// One scripted reader response.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Yield(StreamToken),
    Fail(ReadError),
    /// Never resolves; used to exercise idle timeouts and cancellation.
    Stall,
    End,
}

impl Step {
    pub(crate) fn token(content: &str) -> Self {
        Self::Yield(StreamToken::new(content))
    }

    pub(crate) fn transient(cause: &str) -> Self {
        Self::Fail(ReadError::Transient(cause.to_string()))
    }
}

/// Reader that replays a fixed script; an exhausted script reads as end-of-stream.
pub(crate) struct ScriptedReader {
    steps: VecDeque<Step>,
    reads: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl ScriptedReader {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            reads: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn reads_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }

    pub(crate) fn released_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

#[async_trait]
impl TokenReader for ScriptedReader {
    async fn read(&mut self) -> Result<Option<StreamToken>, ReadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(Step::Yield(token)) => Ok(Some(token)),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Stall) => std::future::pending().await,
            Some(Step::End) | None => Ok(None),
        }
    }

    async fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Provider that hands out a fresh [`ScriptedReader`] per `stream` call.
pub(crate) struct ScriptedProvider {
    script: Vec<Step>,
    open_failure: Option<String>,
    opened: AtomicUsize,
    last_messages: Mutex<Vec<PromptMessage>>,
    released: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub(crate) fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            open_failure: None,
            opened: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn tokens(parts: &[&str]) -> Self {
        let mut script: Vec<Step> = parts.iter().map(|p| Step::token(p)).collect();
        script.push(Step::End);
        Self::new(script)
    }

    pub(crate) fn failing(cause: &str) -> Self {
        Self {
            open_failure: Some(cause.to_string()),
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn last_messages(&self) -> Vec<PromptMessage> {
        self.last_messages.lock().clone()
    }

    pub(crate) fn released_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

#[async_trait]
impl ModelStreamProvider for ScriptedProvider {
    async fn stream(&self, messages: &[PromptMessage]) -> Result<Box<dyn TokenReader>, ReadError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock() = messages.to_vec();
        if let Some(cause) = &self.open_failure {
            return Err(ReadError::Fatal(cause.clone()));
        }
        let mut reader = ScriptedReader::new(self.script.clone());
        reader.released = Arc::clone(&self.released);
        Ok(Box::new(reader))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
