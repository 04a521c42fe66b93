use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Verb;

/// Which side of an operation a schema describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaDirection {
    Request,
    Response,
}

impl SchemaDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for SchemaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic schema identifier: `{operation}_{VERB}_{request|response}`.
#[must_use]
pub fn schema_id(operation: &str, verb: Verb, direction: SchemaDirection) -> String {
    format!("{operation}_{verb}_{direction}")
}

/// A JSON-schema document registered under a stable identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireSchema {
    /// Identifier produced by [`schema_id`]; also written to the document's `$id`.
    pub id: String,
    /// The schema document itself.
    pub document: serde_json::Value,
}
