use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Wire protocol an operation is served over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transport {
    /// Request/response over HTTP.
    Http,
    /// Message/stream over an upgraded WebSocket.
    Ws,
}

impl Transport {
    /// Upper-case protocol label used in span names and attributes.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Ws => "WS",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of verbs an operation can be registered under.
///
/// `Message` is the only WebSocket verb; every other verb is HTTP. A handler
/// pool holds at most one operation per verb, addressed by [`Verb::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Message,
}

impl Verb {
    /// Every verb, in slot order.
    pub const ALL: [Verb; 6] = [
        Verb::Get,
        Verb::Post,
        Verb::Put,
        Verb::Patch,
        Verb::Delete,
        Verb::Message,
    ];

    /// Number of verb slots in a handler pool.
    pub const COUNT: usize = Self::ALL.len();

    /// Dense slot index of this verb, `0..Verb::COUNT`.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Get => 0,
            Self::Post => 1,
            Self::Put => 2,
            Self::Patch => 3,
            Self::Delete => 4,
            Self::Message => 5,
        }
    }

    /// The transport this verb belongs to.
    #[must_use]
    pub fn transport(self) -> Transport {
        match self {
            Self::Message => Transport::Ws,
            _ => Transport::Http,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Message => "MESSAGE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown verb name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown verb: {0}")]
pub struct UnknownVerb(pub String);

impl FromStr for Verb {
    type Err = UnknownVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verb::ALL
            .into_iter()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownVerb(s.to_string()))
    }
}

/// Author of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One input message sent to the model when opening a completion stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Provider metadata attached to a streamed token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// Model that produced the token, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Whether the provider flagged this token as the last one.
    #[serde(default)]
    pub done: bool,
    /// Provider-specific fields (durations, token counts, ...).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One incremental fragment of a model's streamed output.
///
/// Tokens are ordered and must be consumed in production order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamToken {
    pub content: String,
    #[serde(default)]
    pub metadata: TokenMetadata,
}

impl StreamToken {
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: TokenMetadata::default(),
        }
    }

    /// The empty token: concatenating it with any token yields that token's content.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Appends `next`'s content to this token and adopts `next`'s metadata.
    #[must_use]
    pub fn concat(mut self, next: &StreamToken) -> Self {
        self.content.push_str(&next.content);
        self.metadata = next.metadata.clone();
        self
    }
}
