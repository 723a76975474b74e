//! Vendor operation backends.
//!
//! A [`VendorBackend`] turns a contract-valid, authorized [`OperationCall`]
//! into an [`ApiResponse`]. Two implementations exist:
//!
//! | Mode | Type | Behavior |
//! |------|------|----------|
//! | [`BackendMode::Mock`] | [`MockBackend`] | canned response per operation id, no state |
//! | [`BackendMode::Simulated`] | [`SimulatedBackend`] | in-memory resource model |
//!
//! [`Backend`] selects one of them at startup; the choice never changes for
//! the life of the process.

pub mod mock;
pub mod simulated;

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use vendorsim_authn::{AuthContext, TokenService};

pub use self::{mock::MockBackend, simulated::SimulatedBackend};
use crate::{
    contract::ApiContract,
    error::{HarnessError, HarnessResult},
};

/// Which backend answers vendor operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Fixed canned responses.
    Mock,
    /// Stateful in-memory resources.
    #[default]
    Simulated,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mock => f.write_str("mock"),
            Self::Simulated => f.write_str("simulated"),
        }
    }
}

/// A request that passed the contract gate and, where required, authorization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationCall {
    /// Contract operation id, the dispatch key.
    pub operation_id: String,
    /// Path parameters, coerced to their declared types.
    pub path_params: BTreeMap<String, Value>,
    /// Query parameters, coerced to their declared types.
    pub query: BTreeMap<String, Value>,
    /// Decoded JSON body.
    pub body: Option<Value>,
    /// Caller identity for secured operations.
    pub auth: Option<AuthContext>,
}

impl OperationCall {
    /// Creates a call with no parameters, body or caller.
    #[must_use]
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self { operation_id: operation_id.into(), ..Self::default() }
    }

    /// Adds a path parameter.
    #[must_use]
    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the caller identity.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = Some(auth);
        self
    }

    /// String value of a path parameter.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::BackendFault`] when the parameter is absent or
    /// not a string; the contract gate guarantees both for declared parameters.
    pub fn path_str(&self, name: &str) -> HarnessResult<&str> {
        self.path_params.get(name).and_then(Value::as_str).ok_or_else(|| {
            HarnessError::backend_fault(format!(
                "{}: path parameter '{name}' missing",
                self.operation_id
            ))
        })
    }

    /// Body field, if the body is an object containing it.
    #[must_use]
    pub fn body_field(&self, name: &str) -> Option<&Value> {
        self.body.as_ref()?.get(name)
    }

    /// String body field.
    #[must_use]
    pub fn body_str(&self, name: &str) -> Option<&str> {
        self.body_field(name)?.as_str()
    }

    /// Caller identity.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::BackendFault`] when the call carries no
    /// identity; secured operations always do.
    pub fn caller(&self) -> HarnessResult<&AuthContext> {
        self.auth.as_ref().ok_or_else(|| {
            HarnessError::backend_fault(format!("{}: no caller identity", self.operation_id))
        })
    }
}

/// Status and JSON body produced by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// JSON body.
    pub body: Value,
}

impl ApiResponse {
    /// `200` with `{"data": data}`.
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self { status: StatusCode::OK, body: json!({ "data": data }) }
    }

    /// `200` with `{"data": null}`.
    #[must_use]
    pub fn empty() -> Self {
        Self::ok(Value::Null)
    }

    /// Error status with `{"message": message}`.
    #[must_use]
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, body: json!({ "message": message.into() }) }
    }

    /// `400` with a message.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::error(StatusCode::BAD_REQUEST, message)
    }

    /// `401` with the generic message.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::error(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    /// `404` with a message.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::error(StatusCode::NOT_FOUND, message)
    }
}

/// Token envelope returned by `login`.
pub(crate) fn login_tokens(access_token: String) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3000,
        "refresh_token": "refresh",
        "password_change_required": false,
    })
}

/// Handles vendor operations.
///
/// Implementations must be thread-safe: one instance serves every request.
#[async_trait]
pub trait VendorBackend: Send + Sync {
    /// Produces the response for one operation call.
    ///
    /// Client-visible outcomes such as 404 or 400 are returned as
    /// [`ApiResponse`]s; `Err` is reserved for faults of the harness itself.
    async fn handle(&self, call: &OperationCall) -> HarnessResult<ApiResponse>;

    /// The mode this backend implements.
    fn mode(&self) -> BackendMode;
}

/// Backend selected by [`BackendMode`].
#[derive(Debug, Clone)]
pub enum Backend {
    /// Canned responses.
    Mock(Arc<MockBackend>),
    /// In-memory resource model.
    Simulated(Arc<SimulatedBackend>),
}

impl Backend {
    /// Builds the backend for `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mock fixture cannot be loaded or a token cannot
    /// be pre-issued.
    pub fn new(
        mode: BackendMode,
        tokens: Arc<TokenService>,
        contract: &ApiContract,
    ) -> HarnessResult<Self> {
        Ok(match mode {
            BackendMode::Mock => Self::Mock(Arc::new(MockBackend::new(&tokens, contract)?)),
            BackendMode::Simulated => Self::Simulated(Arc::new(SimulatedBackend::new(tokens))),
        })
    }

    /// Returns the simulated backend, if that is the active mode.
    #[must_use]
    pub fn as_simulated(&self) -> Option<&SimulatedBackend> {
        match self {
            Self::Simulated(backend) => Some(backend),
            Self::Mock(_) => None,
        }
    }
}

#[async_trait]
impl VendorBackend for Backend {
    async fn handle(&self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        match self {
            Self::Mock(backend) => backend.handle(call).await,
            Self::Simulated(backend) => backend.handle(call).await,
        }
    }

    fn mode(&self) -> BackendMode {
        match self {
            Self::Mock(_) => BackendMode::Mock,
            Self::Simulated(_) => BackendMode::Simulated,
        }
    }
}
