use thiserror::Error;

use wakeline_core::{StoreError, SurfacedError};
use wakeline_types::OperationKind;

/// Delivery failures. None of these are fatal to a fallback chain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn from_reqwest(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(timeout_ms)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "timeout",
            TransportError::Connect(_) => "connect",
            TransportError::Request(_) => "request",
            TransportError::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Errors that end an operation. Only confirmed business rejections and local storage failures
/// make it this far; every backend ambiguity resolves to a result instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{message}")]
    InvalidCredentials { message: String },

    #[error("{message}")]
    AlreadyExists { message: String },

    #[error("{message}")]
    Rejected {
        operation: OperationKind,
        status: u16,
        message: String,
    },

    #[error("session storage failed: {0}")]
    Storage(#[from] StoreError),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::InvalidCredentials { .. } => "invalid_credentials",
            DispatchError::AlreadyExists { .. } => "already_exists",
            DispatchError::Rejected { .. } => "rejected",
            DispatchError::Storage(_) => "storage",
        }
    }

    pub fn is_rejection(&self) -> bool {
        !matches!(self, DispatchError::Storage(_))
    }

    pub fn to_surfaced(&self) -> SurfacedError {
        SurfacedError::new(self.code(), self.to_string())
    }
}
