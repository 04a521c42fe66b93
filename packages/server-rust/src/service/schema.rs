//! Registry of advisory JSON schemas for every HTTP operation's wire format.

use std::collections::BTreeMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use docintake_core::WireSchema;
use serde_json::{json, Map, Value};
use utoipa::openapi::{RefOr, Schema};
use utoipa::ToSchema;

use super::error::ConfigError;

const DIALECT: &str = "https://json-schema.org/draft/2020-12/schema";

/// JSON schema of `T`, with the schemas of every type it references inlined
/// under `components.schemas`.
#[must_use]
pub fn schema_document<T: ToSchema>() -> Value {
    let mut referenced: Vec<(String, RefOr<Schema>)> = Vec::new();
    T::schemas(&mut referenced);

    let mut document = serde_json::to_value(T::schema()).unwrap_or(Value::Null);
    if !referenced.is_empty() {
        let components: Map<String, Value> = referenced
            .into_iter()
            .map(|(name, schema)| (name, serde_json::to_value(schema).unwrap_or(Value::Null)))
            .collect();
        if let Value::Object(object) = &mut document {
            object.insert("components".to_string(), json!({ "schemas": components }));
        }
    }
    document
}

/// Wraps a data schema in the success/failure envelope.
#[must_use]
pub fn envelope_document(data: Value) -> Value {
    json!({
        "oneOf": [
            {
                "type": "object",
                "required": ["isError", "data"],
                "properties": {
                    "isError": { "const": false },
                    "data": data,
                },
            },
            {
                "type": "object",
                "required": ["isError", "error"],
                "properties": {
                    "isError": { "const": true },
                    "error": {
                        "type": "object",
                        "required": ["message", "code"],
                        "properties": {
                            "message": { "type": "string" },
                            "code": { "type": "string" },
                        },
                    },
                },
            },
        ]
    })
}

/// Schemas registered by subscribed HTTP controllers, keyed by schema id.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, Value>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `document` under `id`, stamping `$id` and `$schema` on it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DuplicateSchema` if `id` is taken, or
    /// `ConfigError::Schema` if `document` is not a JSON object.
    pub fn register(&self, id: &str, document: Value) -> Result<(), ConfigError> {
        let Value::Object(mut object) = document else {
            return Err(ConfigError::Schema {
                id: id.to_string(),
                cause: "schema document must be a JSON object".to_string(),
            });
        };
        object.insert("$id".to_string(), Value::String(id.to_string()));
        object.insert("$schema".to_string(), Value::String(DIALECT.to_string()));

        match self.schemas.entry(id.to_string()) {
            Entry::Occupied(_) => Err(ConfigError::DuplicateSchema { id: id.to_string() }),
            Entry::Vacant(slot) => {
                slot.insert(Value::Object(object));
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Value> {
        self.schemas.get(id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.schemas.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// All schemas, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WireSchema> {
        let ordered: BTreeMap<String, Value> = self
            .schemas
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        ordered
            .into_iter()
            .map(|(id, document)| WireSchema { id, document })
            .collect()
    }
}
