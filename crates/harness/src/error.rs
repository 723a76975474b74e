//! Harness error types and result alias.
//!
//! # Error Types
//!
//! - [`HarnessError::SchemaViolation`] - request does not conform to the contract (400)
//! - [`HarnessError::Unauthorized`] - token verification or scope check failed (401)
//! - [`HarnessError::BackendFault`] - backend could not produce a response (500)
//! - [`HarnessError::ResponseViolation`] - backend response breaks the contract (500)
//! - [`HarnessError::ContractLoad`], [`HarnessError::Config`], [`HarnessError::Io`] - startup
//!   failures, fatal before the listener is bound
//!
//! # Example
//!
//! ```
//! use vendorsim_harness::{HarnessError, HarnessResult};
//!
//! fn lookup(operation: &str) -> HarnessResult<()> {
//!     Err(HarnessError::backend_fault(format!("no handler for {operation}")))
//! }
//!
//! assert_eq!(lookup("getWidgets").unwrap_err().status_code().as_u16(), 500);
//! ```

use std::sync::Arc;

use axum::http::StatusCode;
use thiserror::Error;
use vendorsim_authn::AuthError;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors produced while serving or starting the harness.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HarnessError {
    /// The request failed contract validation.
    ///
    /// Each violation reads `"<location>: expected ..., received ..."`.
    #[error("Request for {operation} violates the contract: {}", violations.join("; "))]
    SchemaViolation {
        /// Operation id, or `METHOD /path` when no operation matched.
        operation: String,
        /// Human-readable violation descriptions.
        violations: Vec<String>,
    },

    /// Authentication or authorization failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    /// The backend failed to handle a contract-valid, authorized request.
    #[error("Backend fault: {message}")]
    BackendFault {
        /// Description of the fault.
        message: String,
    },

    /// A backend response does not match the contract's declared schema.
    #[error("Response for {operation} (status {status}) violates the contract: {}", violations.join("; "))]
    ResponseViolation {
        /// Operation id.
        operation: String,
        /// Response status that was validated.
        status: u16,
        /// Human-readable violation descriptions.
        violations: Vec<String>,
    },

    /// The API contract could not be read, parsed or compiled.
    #[error("Contract load error: {message}")]
    ContractLoad {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Invalid startup configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the failure.
        message: String,
    },

    /// I/O failure during startup.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Creates a new `SchemaViolation` error.
    #[must_use]
    pub fn schema_violation(operation: impl Into<String>, violations: Vec<String>) -> Self {
        Self::SchemaViolation { operation: operation.into(), violations }
    }

    /// Creates a new `BackendFault` error.
    #[must_use]
    pub fn backend_fault(message: impl Into<String>) -> Self {
        Self::BackendFault { message: message.into() }
    }

    /// Creates a new `ResponseViolation` error.
    #[must_use]
    pub fn response_violation(
        operation: impl Into<String>,
        status: u16,
        violations: Vec<String>,
    ) -> Self {
        Self::ResponseViolation { operation: operation.into(), status, violations }
    }

    /// Creates a new `ContractLoad` error with the given message.
    #[must_use]
    pub fn contract_load(message: impl Into<String>) -> Self {
        Self::ContractLoad { message: message.into(), source: None }
    }

    /// Creates a new `ContractLoad` error with a message and source error.
    #[must_use]
    pub fn contract_load_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ContractLoad { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// HTTP status a client sees for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SchemaViolation { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaViolation { .. } => "schema_violation",
            Self::Unauthorized(_) => "unauthorized",
            Self::BackendFault { .. } => "backend_fault",
            Self::ResponseViolation { .. } => "response_violation",
            Self::ContractLoad { .. } => "contract_load",
            Self::Config { .. } => "config",
            Self::Io(_) => "io",
        }
    }
}
