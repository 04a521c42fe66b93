//! docintake core — response envelope, error taxonomy, stream tokens, and
//! the provider traits the server's streaming layer consumes.

pub mod envelope;
pub mod error;
pub mod schema;
pub mod traits;
pub mod types;

pub use envelope::{Envelope, ErrorBody};
pub use error::{ErrorCode, ReadError, StreamError};
pub use schema::{schema_id, SchemaDirection, WireSchema};
pub use traits::{ModelStreamProvider, TokenReader};
pub use types::{PromptMessage, Role, StreamToken, TokenMetadata, Transport, UnknownVerb, Verb};
