//! Request/response error types.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::protocol::status;
use crate::transport::TransportError;

/// Errors surfaced by the request/response engine.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcError {
    /// No matching reply arrived before the deadline
    Timeout { topic: String, timeout: Duration },
    /// The reply carried a status above 299; holds the reply body
    Rejected(Value),
    /// The pending request was dropped before a reply arrived
    Cancelled,
    /// The engine has been disconnected
    Closed,
    /// The request body could not be serialized
    Encode(String),
    /// Transport error
    Transport(TransportError),
}

impl RpcError {
    /// Status carried by the error, as it would appear in a reply envelope
    pub fn status(&self) -> u16 {
        match self {
            Self::Timeout { .. } => status::GATEWAY_TIMEOUT,
            Self::Rejected(body) => body
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(status::INTERNAL_SERVER_ERROR),
            Self::Closed => status::SERVICE_UNAVAILABLE,
            Self::Cancelled | Self::Encode(_) | Self::Transport(_) => {
                status::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The rejected reply body, if any
    pub fn body(&self) -> Option<&Value> {
        match self {
            Self::Rejected(body) => Some(body),
            _ => None,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { topic, timeout } => {
                write!(f, "request to {} timed out after {:?}", topic, timeout)
            }
            Self::Rejected(body) => match body.get("error").and_then(Value::as_str) {
                Some(error) => write!(f, "request rejected with status {}: {}", self.status(), error),
                None => write!(f, "request rejected with status {}", self.status()),
            },
            Self::Cancelled => write!(f, "request cancelled"),
            Self::Closed => write!(f, "client closed"),
            Self::Encode(e) => write!(f, "encode error: {}", e),
            Self::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => Self::Closed,
            other => Self::Transport(other),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}
