//! Operation error type.
//!
//! Every failure that reaches a requester is expressed as a status-bearing
//! envelope; [`DabError`] is the typed form of those failures.

use std::fmt;

use crate::protocol::{status, Response};
use crate::rpc::RpcError;
use crate::transport::TransportError;

/// Errors produced by bridge and device operations.
#[derive(Debug, Clone, PartialEq)]
pub enum DabError {
    /// Missing or malformed request field
    BadRequest(String),
    /// A device is already registered at this address
    AlreadyRegistered(String),
    /// No device is registered at this address
    NotRegistered(String),
    /// Unexpected failure inside an operation
    Internal(String),
    /// Operation has no implementation
    NotImplemented(String),
    /// Operation is not accepted in the current lifecycle state
    InvalidState(String),
    /// A correlated request failed
    Rpc(RpcError),
    /// Transport failure
    Transport(TransportError),
    /// Partner-supplied status and message
    Status { status: u16, message: String },
}

impl DabError {
    /// Status code reported in the error envelope
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) | Self::AlreadyRegistered(_) => status::BAD_REQUEST,
            Self::NotRegistered(_) => status::PRECONDITION_FAILED,
            Self::Internal(_) | Self::Transport(_) => status::INTERNAL_SERVER_ERROR,
            Self::NotImplemented(_) => status::NOT_IMPLEMENTED,
            Self::InvalidState(_) => status::SERVICE_UNAVAILABLE,
            Self::Rpc(e) => error_status(e.status()),
            Self::Status { status: code, .. } => error_status(*code),
        }
    }

    /// Error envelope for this failure
    pub fn to_response(&self) -> Response {
        let mut message = self.to_string();
        if message.is_empty() {
            message = "unknown error".to_string();
        }
        Response::error(self.status(), message)
    }

    /// Shorthand for a partner-supplied status
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }
}

fn error_status(code: u16) -> u16 {
    if status::is_success(code) {
        status::INTERNAL_SERVER_ERROR
    } else {
        code
    }
}

impl fmt::Display for DabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "{}", msg),
            Self::AlreadyRegistered(address) => {
                write!(f, "a device with address {} is already registered", address)
            }
            Self::NotRegistered(address) => {
                write!(f, "no device registered with address {}", address)
            }
            Self::Internal(msg) => write!(f, "{}", msg),
            Self::NotImplemented(operation) => write!(f, "{} is not implemented", operation),
            Self::InvalidState(msg) => write!(f, "{}", msg),
            Self::Rpc(e) => write!(f, "{}", e),
            Self::Transport(e) => write!(f, "{}", e),
            Self::Status { message, .. } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for DabError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rpc(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RpcError> for DabError {
    fn from(err: RpcError) -> Self {
        Self::Rpc(err)
    }
}

impl From<TransportError> for DabError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<DabError> for Response {
    fn from(err: DabError) -> Self {
        err.to_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(DabError::BadRequest("x".into()), 400; "bad request")]
    #[test_case(DabError::AlreadyRegistered("10.0.0.5".into()), 400; "conflict")]
    #[test_case(DabError::NotRegistered("10.0.0.5".into()), 412; "not registered")]
    #[test_case(DabError::Internal("x".into()), 500; "internal")]
    #[test_case(DabError::NotImplemented("x".into()), 501; "not implemented")]
    #[test_case(DabError::InvalidState("x".into()), 503; "invalid state")]
    #[test_case(DabError::Transport(TransportError::Timeout), 500; "transport")]
    #[test_case(DabError::with_status(418, "teapot"), 418; "partner status")]
    #[test_case(DabError::with_status(200, "odd"), 500; "success status is not an error")]
    fn test_status(err: DabError, expected: u16) {
        assert_eq!(err.status(), expected);
        let response = err.to_response();
        assert_eq!(response.status, expected);
        assert!(response.error.is_some());
    }

    #[test]
    fn test_rpc_status_passthrough() {
        let err = DabError::from(RpcError::Rejected(json!({"status": 501, "error": "nope"})));
        assert_eq!(err.status(), 501);
    }

    #[test]
    fn test_envelope_message() {
        let response = DabError::NotRegistered("10.0.0.5".into()).to_response();
        assert_eq!(
            response.error.as_deref(),
            Some("no device registered with address 10.0.0.5")
        );
    }
}
