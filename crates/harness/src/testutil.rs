//! Shared test utilities for harness testing.
//!
//! Builders for harnesses over the bundled contract with a fixed signing key,
//! plus login and token helpers. Feature-gated behind `testutil` to keep them
//! out of production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! vendorsim-harness = { path = "../harness", features = ["testutil"] }
//! ```

use std::{collections::BTreeSet, sync::Arc};

use axum::http::StatusCode;
use serde_json::{Value, json};
use vendorsim_authn::{TokenService, testutil::seeded_token_service};

use crate::{
    backend::{
        BackendMode,
        simulated::{ADMIN_PASSWORD, ADMIN_USERNAME, ROOT_ORG_UID},
    },
    contract::ApiContract,
    pipeline::{Harness, HarnessResponse, InboundRequest},
};

/// Harness over the bundled contract with a seeded token service.
///
/// # Panics
///
/// Panics if the bundled contract does not load.
#[allow(clippy::expect_used)]
#[must_use]
pub fn harness_with(mode: BackendMode, tokens: Arc<TokenService>) -> Harness {
    let contract = ApiContract::bundled().expect("bundled contract loads");
    Harness::builder()
        .contract(Arc::new(contract))
        .tokens(tokens)
        .mode(mode)
        .build()
        .expect("harness builds")
}

/// Mock-mode harness.
#[must_use]
pub fn mock_harness() -> Harness {
    harness_with(BackendMode::Mock, seeded_token_service())
}

/// Simulated-mode harness seeded with the root organization and its admin.
#[must_use]
pub fn simulated_harness() -> Harness {
    harness_with(BackendMode::Simulated, seeded_token_service())
}

/// Every scope the harness's contract declares.
#[must_use]
pub fn all_scopes(harness: &Harness) -> BTreeSet<String> {
    harness.contract().declared_scopes().clone()
}

/// Token for an arbitrary subject in the root organization.
///
/// # Panics
///
/// Panics if the token cannot be issued.
#[allow(clippy::expect_used)]
pub fn root_token<S: Into<String>>(
    harness: &Harness,
    scopes: impl IntoIterator<Item = S>,
) -> String {
    harness.token_service().issue("load-tester", ROOT_ORG_UID, scopes).expect("token issues")
}

/// Token carrying every declared scope.
#[must_use]
pub fn full_token(harness: &Harness) -> String {
    root_token(harness, all_scopes(harness))
}

/// `POST /login` request.
#[must_use]
pub fn login_request(username: &str, password: &str, org: Option<&str>) -> InboundRequest {
    let mut body = json!({ "username": username, "password": password });
    if let Some(org) = org {
        body["org"] = Value::from(org);
    }
    InboundRequest::new("POST", "/login").with_json(&body)
}

/// Logs in through the pipeline and returns the access token.
///
/// # Panics
///
/// Panics if the login is rejected.
#[allow(clippy::expect_used)]
pub async fn login(harness: &Harness, username: &str, password: &str, org: Option<&str>) -> String {
    let response = harness.handle(login_request(username, password, org)).await;
    assert_eq!(response.status, StatusCode::OK, "login failed: {}", response.body);
    access_token(&response)
}

/// Logs in as the root organization's admin.
pub async fn admin_login(harness: &Harness) -> String {
    login(harness, ADMIN_USERNAME, ADMIN_PASSWORD, None).await
}

/// Extracts `data.access_token` from a login response.
///
/// # Panics
///
/// Panics if the body has no access token.
#[allow(clippy::expect_used)]
#[must_use]
pub fn access_token(response: &HarnessResponse) -> String {
    response.body["data"]["access_token"]
        .as_str()
        .expect("response carries an access token")
        .to_owned()
}
