//! Bridge Response envelope
//!
//! Every operation answers with `{status, error?, ...fields}`. The `error`
//! member is present if and only if the status is outside 200-299.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// HTTP-style status codes used by the bridge
pub mod status {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const PRECONDITION_FAILED: u16 = 412;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const NOT_IMPLEMENTED: u16 = 501;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
    pub const GATEWAY_TIMEOUT: u16 = 504;

    /// Whether a status is in the 2xx range
    pub fn is_success(status: u16) -> bool {
        (200..300).contains(&status)
    }
}

/// Error returned when an envelope would violate the error-iff-non-2xx rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidResponse {
    pub status: u16,
}

impl fmt::Display for InvalidResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "an error message must be provided for non-2xx status {}",
            self.status
        )
    }
}

impl std::error::Error for InvalidResponse {}

/// The universal response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Response {
    /// Build an envelope, enforcing that non-2xx statuses carry an error.
    ///
    /// An error message passed with a 2xx status is discarded.
    pub fn new(status: u16, error: Option<String>) -> Result<Self, InvalidResponse> {
        if status::is_success(status) {
            return Ok(Self {
                status,
                error: None,
                fields: Map::new(),
            });
        }
        match error {
            Some(message) if !message.is_empty() => Ok(Self {
                status,
                error: Some(message),
                fields: Map::new(),
            }),
            _ => Err(InvalidResponse { status }),
        }
    }

    /// `{status: 200}`
    pub fn ok() -> Self {
        Self {
            status: status::OK,
            error: None,
            fields: Map::new(),
        }
    }

    /// Error envelope.
    ///
    /// # Panics
    ///
    /// Panics when `status` is 2xx or `message` is empty; both are programming
    /// errors at the construction site.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        assert!(
            !status::is_success(status),
            "error envelope built with success status {}",
            status
        );
        assert!(
            !message.is_empty(),
            "an error message must be provided for non-2xx status {}",
            status
        );
        Self {
            status,
            error: Some(message),
            fields: Map::new(),
        }
    }

    /// The fixed 501 envelope for an operation without an implementation
    pub fn not_implemented(operation: impl fmt::Display) -> Self {
        Self::error(
            status::NOT_IMPLEMENTED,
            format!("{} is not implemented", operation),
        )
    }

    /// Attach an operation-specific field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        status::is_success(self.status)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Interpret an arbitrary JSON body as an envelope, if it has a status
    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("status".into(), Value::from(self.status));
        if let Some(error) = &self.error {
            map.insert("error".into(), Value::from(error.as_str()));
        }
        Value::Object(map)
    }
}

/// Outcome of a handler: how many envelopes to publish on the response topic
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Exactly one envelope
    One(Response),
    /// One envelope per entry (discovery); an empty set publishes nothing
    Many(Vec<Response>),
    /// No reply at all
    None,
}

impl Reply {
    /// The single envelope, if this is a `One`
    pub fn into_one(self) -> Option<Response> {
        match self {
            Reply::One(response) => Some(response),
            _ => None,
        }
    }

    /// Every envelope this reply would publish, in order
    pub fn into_responses(self) -> Vec<Response> {
        match self {
            Reply::One(response) => vec![response],
            Reply::Many(responses) => responses,
            Reply::None => Vec::new(),
        }
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::One(response)
    }
}
