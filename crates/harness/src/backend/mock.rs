//! Stateless canned-response backend.
//!
//! Every operation id maps to one fixed `{"data": ...}` body taken from the
//! vendor's documented samples (`fixtures/mock_responses.json`). Identical
//! calls produce byte-identical responses, regardless of parameters, body or
//! caller.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use vendorsim_authn::TokenService;

use super::{ApiResponse, BackendMode, OperationCall, VendorBackend, login_tokens};
use crate::{
    backend::simulated::ROOT_ORG_UID,
    contract::ApiContract,
    error::{HarnessError, HarnessResult},
};

const FIXTURE: &str = include_str!("../../fixtures/mock_responses.json");

/// Subject of the token returned by the mock `login`.
pub const MOCK_SUBJECT: &str = "uid_string";

/// Canned-response backend.
#[derive(Debug)]
pub struct MockBackend {
    responses: BTreeMap<String, ApiResponse>,
}

impl MockBackend {
    /// Loads the bundled fixture and pre-issues the `login` token.
    ///
    /// The token grants every scope `contract` declares, so a client that
    /// logs in against the mock can call any operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the fixture is not a JSON object or the token
    /// cannot be signed.
    pub fn new(tokens: &TokenService, contract: &ApiContract) -> HarnessResult<Self> {
        let fixture: BTreeMap<String, Value> = serde_json::from_str(FIXTURE)
            .map_err(|e| HarnessError::backend_fault(format!("invalid mock fixture: {e}")))?;

        let mut responses: BTreeMap<String, ApiResponse> = fixture
            .into_iter()
            .map(|(operation, data)| (operation, ApiResponse::ok(data)))
            .collect();

        let token = tokens
            .issue(MOCK_SUBJECT, ROOT_ORG_UID, contract.declared_scopes().iter().cloned())
            .map_err(|e| HarnessError::backend_fault(format!("cannot issue mock token: {e}")))?;
        responses.insert("login".to_owned(), ApiResponse::ok(login_tokens(token)));

        Ok(Self { responses })
    }

    /// Operation ids with a canned response.
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.responses.keys().map(String::as_str)
    }
}

#[async_trait]
impl VendorBackend for MockBackend {
    async fn handle(&self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        self.responses.get(&call.operation_id).cloned().ok_or_else(|| {
            HarnessError::backend_fault(format!(
                "no canned response for operation '{}'",
                call.operation_id
            ))
        })
    }

    fn mode(&self) -> BackendMode {
        BackendMode::Mock
    }
}
