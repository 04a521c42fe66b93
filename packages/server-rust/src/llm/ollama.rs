//! Ollama-compatible `/api/chat` streaming provider.
//!
//! The response body is newline-delimited JSON, one chat chunk per line. A
//! chunk with `"done": true` ends the stream; a body that closes before it
//! is a fatal read.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use docintake_core::{ModelStreamProvider, PromptMessage, ReadError, StreamToken, TokenMetadata, TokenReader};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Where the model server lives and which model to ask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub connect_timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// One decoded line of the response body.
#[derive(Debug, PartialEq)]
struct Decoded {
    /// `None` for chunks without content.
    token: Option<StreamToken>,
    done: bool,
}

fn decode_line(line: &str) -> Result<Decoded, ReadError> {
    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|err| ReadError::Fatal(format!("malformed chat chunk: {err}")))?;
    if let Some(error) = chunk.error {
        return Err(ReadError::Fatal(error));
    }

    let content = chunk.message.map(|m| m.content).unwrap_or_default();
    let token = (!content.is_empty()).then(|| {
        let mut extra = chunk.extra;
        extra.remove("created_at");
        StreamToken {
            content,
            metadata: TokenMetadata {
                model: chunk.model,
                done: chunk.done,
                extra,
            },
        }
    });
    Ok(Decoded {
        token,
        done: chunk.done,
    })
}

/// Splits a byte stream into complete, non-blank lines.
#[derive(Debug, Default)]
struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Result<Option<String>, ReadError> {
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = to_text(&line[..end])?;
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    /// Whatever is left once the body ends without a trailing newline.
    fn finish(&mut self) -> Result<Option<String>, ReadError> {
        let rest = std::mem::take(&mut self.buffer);
        let line = to_text(&rest)?;
        Ok((!line.trim().is_empty()).then_some(line))
    }
}

fn to_text(bytes: &[u8]) -> Result<String, ReadError> {
    String::from_utf8(bytes.to_vec()).map_err(|err| ReadError::Fatal(format!("chat chunk is not UTF-8: {err}")))
}

/// Connection-level failures are worth retrying; everything else is not.
fn classify(err: &reqwest::Error) -> ReadError {
    if err.is_timeout() || err.is_connect() {
        ReadError::Transient(err.to_string())
    } else {
        ReadError::Fatal(err.to_string())
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

struct OllamaReader {
    body: Option<ByteStream>,
    lines: LineDecoder,
    done: bool,
}

impl OllamaReader {
    /// Decodes buffered lines until one carries content or ends the stream.
    fn drain_lines(&mut self, line: Option<String>) -> Result<Option<StreamToken>, ReadError> {
        let mut line = line;
        while let Some(current) = line {
            let decoded = decode_line(&current)?;
            if decoded.done {
                self.done = true;
            }
            if decoded.token.is_some() || self.done {
                return Ok(decoded.token);
            }
            line = self.lines.next_line()?;
        }
        Ok(None)
    }
}

#[async_trait]
impl TokenReader for OllamaReader {
    async fn read(&mut self) -> Result<Option<StreamToken>, ReadError> {
        loop {
            if self.done {
                return Ok(None);
            }
            let line = self.lines.next_line()?;
            if line.is_some() {
                if let Some(token) = self.drain_lines(line)? {
                    return Ok(Some(token));
                }
                continue;
            }

            let Some(body) = self.body.as_mut() else {
                return Err(ReadError::Fatal("stream ended before done chunk".to_string()));
            };
            match body.next().await {
                Some(Ok(bytes)) => self.lines.push(&bytes),
                Some(Err(err)) => return Err(classify(&err)),
                None => {
                    self.body = None;
                    let rest = self.lines.finish()?;
                    if let Some(token) = self.drain_lines(rest)? {
                        return Ok(Some(token));
                    }
                }
            }
        }
    }

    async fn release(&mut self) {
        self.body = None;
        self.done = true;
    }
}

/// Streams chat completions from an Ollama-compatible server.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    config: ModelConfig,
}

impl OllamaProvider {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ModelConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ModelStreamProvider for OllamaProvider {
    async fn stream(&self, messages: &[PromptMessage]) -> Result<Box<dyn TokenReader>, ReadError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            stream: true,
        };
        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|err| classify(&err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReadError::Fatal(format!("model server answered {status}: {body}")));
        }

        debug!(model = %self.config.model, url = %self.chat_url(), "chat stream opened");
        Ok(Box::new(OllamaReader {
            body: Some(Box::pin(response.bytes_stream())),
            lines: LineDecoder::default(),
            done: false,
        }))
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
