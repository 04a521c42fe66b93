//! Uniform success/error wrapper crossing the system boundary.
//!
//! Every outcome on both transports is one of:
//!
//! ```json
//! {"isError": false, "data": <T>}
//! {"isError": true, "error": {"message": "...", "code": "UNIDENTIFIED"}}
//! ```

use serde::de::{self, DeserializeOwned};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ErrorCode;

/// Error half of the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: ErrorCode,
}

/// Response envelope for one operation outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<T> {
    Success(T),
    Failure(ErrorBody),
}

impl<T> Envelope<T> {
    #[must_use]
    pub fn success(data: T) -> Self {
        Self::Success(data)
    }

    #[must_use]
    pub fn failure(message: impl Into<String>, code: ErrorCode) -> Self {
        Self::Failure(ErrorBody {
            message: message.into(),
            code,
        })
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success(data) => Some(data),
            Self::Failure(_) => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&ErrorBody> {
        match self {
            Self::Success(_) => None,
            Self::Failure(body) => Some(body),
        }
    }
}

impl<T: Serialize> Serialize for Envelope<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Envelope", 2)?;
        match self {
            Self::Success(data) => {
                state.serialize_field("isError", &false)?;
                state.serialize_field("data", data)?;
            }
            Self::Failure(body) => {
                state.serialize_field("isError", &true)?;
                state.serialize_field("error", body)?;
            }
        }
        state.end()
    }
}

#[derive(Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct RawEnvelope<T> {
    #[serde(rename = "isError")]
    is_error: bool,
    data: Option<T>,
    error: Option<ErrorBody>,
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Envelope<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEnvelope::<T>::deserialize(deserializer)?;
        if raw.is_error {
            raw.error
                .map(Self::Failure)
                .ok_or_else(|| de::Error::missing_field("error"))
        } else {
            raw.data
                .map(Self::Success)
                .ok_or_else(|| de::Error::missing_field("data"))
        }
    }
}
