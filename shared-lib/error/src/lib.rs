//! Common error types for the RPC and gateway servers.
//!
//! Every synchronous lifecycle failure (listen, dial, registration,
//! shutdown) is reported as a [`ServerError`]. Failures of the background
//! serve loops are never returned to a caller; they are logged and surfaced
//! through the serve task status instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error used for sources coming from other crates.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server lifecycle errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to dial gRPC server at {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to register gateway (registrar #{index}): {source}")]
    Register {
        index: usize,
        #[source]
        source: BoxError,
    },

    #[error("failed to shutdown {server}: {reason}")]
    Shutdown { server: &'static str, reason: String },

    #[error("{0} is already started")]
    AlreadyStarted(&'static str),

    #[error("cannot {op} while server is {state}")]
    InvalidState { op: &'static str, state: String },

    #[error("failed to start gRPC server: {0}")]
    StartRpc(Box<ServerError>),

    #[error("failed to start gateway: {0}")]
    StartGateway(Box<ServerError>),

    #[error("failed to stop gateway: {0}")]
    StopGateway(Box<ServerError>),
}

impl ServerError {
    /// Wrap a dial failure for `addr`.
    pub fn dial(addr: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Dial {
            addr: addr.into(),
            source: source.into(),
        }
    }

    /// Wrap a registrar failure at position `index`.
    pub fn register(index: usize, source: impl Into<BoxError>) -> Self {
        Self::Register {
            index,
            source: source.into(),
        }
    }

    /// The innermost lifecycle error, skipping the stage wrappers added by
    /// the composite server.
    pub fn root(&self) -> &ServerError {
        match self {
            Self::StartRpc(inner) | Self::StartGateway(inner) | Self::StopGateway(inner) => {
                inner.root()
            }
            other => other,
        }
    }
}

/// Error body written by the gateway for failed HTTP calls.
///
/// `code` carries the gRPC status code, not the HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// gRPC status code for programmatic handling
    pub code: i32,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Result type alias using ServerError.
pub type Result<T> = std::result::Result<T, ServerError>;
