//! Request pipeline.
//!
//! [`Harness::handle`] runs every vendor request through the same fixed
//! sequence:
//!
//! 1. [`RequestRecorder::record`], before any validation
//! 2. [`ApiContract::match_request`]; a violation answers `400`
//! 3. [`ScopeAuthorizer::authorize`] when the operation is secured; any
//!    failure answers `401` with a generic body
//! 4. the [`Backend`] selected at construction; a fault answers `500`
//! 5. [`ApiContract::validate_response`]; a violation answers `500`
//!
//! Each outcome is counted in [`HarnessMetrics`].

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use axum::{body::Bytes, http::StatusCode};
use serde_json::{Value, json};
use tracing::{Span, debug, error, field, warn};
use vendorsim_authn::{ScopeAuthorizer, SigningIdentity, TokenService};

use crate::{
    backend::{ApiResponse, Backend, BackendMode, OperationCall, VendorBackend},
    config::HarnessConfig,
    contract::{ApiContract, Security},
    error::{HarnessError, HarnessResult},
    metrics::{HarnessMetrics, Outcome},
    recorder::RequestRecorder,
};

/// One inbound vendor request, already split out of the HTTP layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundRequest {
    /// HTTP method.
    pub method: String,
    /// Path relative to the API base path.
    pub path: String,
    /// Raw query string.
    pub query: Option<String>,
    /// Header values keyed by lower-cased name.
    pub headers: BTreeMap<String, Vec<String>>,
    /// Raw body.
    pub body: Bytes,
}

impl InboundRequest {
    /// Creates a request with no query, headers or body.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self { method: method.into(), path: path.into(), ..Self::default() }
    }

    /// Sets the raw query string.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Appends a header value; the name is lower-cased.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.entry(name.to_ascii_lowercase()).or_default().push(value.into());
        self
    }

    /// Sets `Authorization: Bearer <token>`.
    #[must_use]
    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("authorization", format!("Bearer {token}"))
    }

    /// Sets the raw body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `body` as the JSON body and sets `content-type`.
    #[must_use]
    pub fn with_json(self, body: &Value) -> Self {
        self.with_header("content-type", "application/json").with_body(body.to_string())
    }

    /// First value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase())?.first().map(String::as_str)
    }
}

/// Status and JSON body returned to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// JSON body.
    pub body: Value,
}

impl HarnessResponse {
    /// Client-facing rendering of a pipeline error.
    ///
    /// Authorization failures never reveal their cause.
    #[must_use]
    pub fn from_error(error: &HarnessError) -> Self {
        let body = match error {
            HarnessError::SchemaViolation { violations, .. } => {
                json!({ "message": error.to_string(), "violations": violations })
            },
            HarnessError::Unauthorized(_) => json!({ "message": "unauthorized" }),
            _ => json!({ "message": error.to_string() }),
        };
        Self { status: error.status_code(), body }
    }
}

impl From<ApiResponse> for HarnessResponse {
    fn from(response: ApiResponse) -> Self {
        Self { status: response.status, body: response.body }
    }
}

/// The assembled harness: contract, authorizer, recorder, backend and metrics.
#[derive(Debug)]
pub struct Harness {
    contract: Arc<ApiContract>,
    authorizer: ScopeAuthorizer,
    recorder: Arc<RequestRecorder>,
    backend: Backend,
    metrics: HarnessMetrics,
}

#[bon::bon]
impl Harness {
    /// Assembles a harness.
    ///
    /// The backend mode is fixed for the life of the harness.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be built.
    #[builder]
    pub fn new(
        contract: Arc<ApiContract>,
        tokens: Arc<TokenService>,
        #[builder(default)] mode: BackendMode,
    ) -> HarnessResult<Self> {
        let backend = Backend::new(mode, Arc::clone(&tokens), &contract)?;
        Ok(Self {
            contract,
            authorizer: ScopeAuthorizer::new(tokens),
            recorder: Arc::new(RequestRecorder::new()),
            backend,
            metrics: HarnessMetrics::new(),
        })
    }
}

impl Harness {
    /// Builds a harness from startup configuration.
    ///
    /// Loads the configured contract (or the bundled one) and creates the
    /// token service from the configured seed and TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the contract cannot
    /// be loaded.
    pub fn from_config(config: &HarnessConfig) -> HarnessResult<Self> {
        config.validate()?;
        let contract = match config.contract() {
            Some(path) => ApiContract::load(path)?,
            None => ApiContract::bundled()?,
        };
        let tokens = TokenService::builder()
            .maybe_identity(config.seed()?.map(|seed| SigningIdentity::from_seed(&seed)))
            .maybe_ttl(config.token_ttl())
            .build();

        Self::builder()
            .contract(Arc::new(contract))
            .tokens(Arc::new(tokens))
            .mode(config.mode())
            .build()
    }

    /// The loaded contract.
    #[must_use]
    pub fn contract(&self) -> &Arc<ApiContract> {
        &self.contract
    }

    /// Token service used to verify, and in simulated mode issue, tokens.
    #[must_use]
    pub fn token_service(&self) -> &Arc<TokenService> {
        self.authorizer.token_service()
    }

    /// Every request received so far.
    #[must_use]
    pub fn recorder(&self) -> &Arc<RequestRecorder> {
        &self.recorder
    }

    /// Outcome counters.
    #[must_use]
    pub fn metrics(&self) -> &HarnessMetrics {
        &self.metrics
    }

    /// The backend answering vendor operations.
    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Active backend mode.
    #[must_use]
    pub fn mode(&self) -> BackendMode {
        self.backend.mode()
    }

    /// Runs one request through the pipeline.
    ///
    /// Never fails: every error is rendered as a response.
    #[tracing::instrument(
        skip(self, request),
        fields(
            method = %request.method,
            path = %request.path,
            sequence = field::Empty,
            operation = field::Empty,
        )
    )]
    pub async fn handle(&self, request: InboundRequest) -> HarnessResponse {
        let start = Instant::now();
        let sequence = self.recorder.record(
            &request.method,
            &request.path,
            request.query.as_deref(),
            request.headers.clone(),
            &request.body,
        );
        Span::current().record("sequence", sequence);

        let (operation, outcome, response) = self.dispatch(&request).await;
        self.metrics.record(operation.as_deref(), outcome, start.elapsed());
        response
    }

    async fn dispatch(
        &self,
        request: &InboundRequest,
    ) -> (Option<String>, Outcome, HarnessResponse) {
        let matched = match self.contract.match_request(
            &request.method,
            &request.path,
            request.query.as_deref(),
            &request.headers,
            &request.body,
        ) {
            Ok(matched) => matched,
            Err(e) => {
                debug!(error = %e, "request rejected by contract");
                return (None, Outcome::SchemaRejected, HarnessResponse::from_error(&e));
            },
        };
        let operation = matched.operation_id.clone();
        Span::current().record("operation", operation.as_str());

        let auth = match &matched.security {
            Security::Anonymous => None,
            Security::Bearer { scopes } => {
                match self.authorizer.authorize(request.header("authorization"), scopes) {
                    Ok(context) => Some(context),
                    Err(e) => {
                        warn!(kind = e.kind(), error = %e, "authorization rejected");
                        let response = HarnessResponse::from_error(&HarnessError::from(e));
                        return (Some(operation), Outcome::AuthRejected, response);
                    },
                }
            },
        };

        let call = OperationCall {
            operation_id: matched.operation_id,
            path_params: matched.path_params,
            query: matched.query,
            body: matched.body,
            auth,
        };

        let response = match self.backend.handle(&call).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "backend fault");
                return (Some(operation), Outcome::BackendFault, HarnessResponse::from_error(&e));
            },
        };

        if let Err(e) =
            self.contract.validate_response(&operation, response.status.as_u16(), &response.body)
        {
            error!(error = %e, "backend response violates the contract");
            return (Some(operation), Outcome::ResponseViolation, HarnessResponse::from_error(&e));
        }

        debug!(status = response.status.as_u16(), "request served");
        (Some(operation), Outcome::Accepted, response.into())
    }
}
