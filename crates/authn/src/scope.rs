//! Per-request scope authorization.
//!
//! [`ScopeAuthorizer`] turns an `Authorization` header and an operation's
//! required scopes into an [`AuthContext`] or an [`AuthError`]. A request is
//! allowed only when every required scope is present in the token's `perm`
//! claim; scopes are compared by exact string equality.

use std::{collections::BTreeSet, sync::Arc};

use crate::{
    error::{AuthError, Result},
    jwt::TokenService,
};

/// Identity and grants of an authorized caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Caller identity (`sub` claim).
    pub subject: String,
    /// Organization the caller acts within (`org` claim).
    pub organization: String,
    /// Granted scopes (`perm` claim).
    pub permissions: BTreeSet<String>,
}

/// Gate deciding whether a bearer token grants an operation's scopes.
///
/// Holds no state besides the shared [`TokenService`], so one instance can be
/// used from any number of request handlers at once.
#[derive(Debug, Clone)]
pub struct ScopeAuthorizer {
    tokens: Arc<TokenService>,
}

impl ScopeAuthorizer {
    /// Creates an authorizer that verifies tokens with `tokens`.
    #[must_use]
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }

    /// The token service used for verification.
    #[must_use]
    pub fn token_service(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Authorizes a request.
    ///
    /// `authorization` is the raw `Authorization` header value, if any.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingCredential`] if there is no bearer token
    /// - any verification error from [`TokenService::verify`], unchanged
    /// - [`AuthError::InsufficientScope`] naming exactly the missing scopes
    #[tracing::instrument(skip(self, authorization, required), fields(required_scopes = required.len()))]
    pub fn authorize(
        &self,
        authorization: Option<&str>,
        required: &BTreeSet<String>,
    ) -> Result<AuthContext> {
        let token = bearer_token(authorization).ok_or_else(AuthError::missing_credential)?;
        let claims = self.tokens.verify(token)?;

        let missing = missing_scopes(required, &claims.perm);
        if !missing.is_empty() {
            return Err(AuthError::insufficient_scope(missing));
        }

        Ok(AuthContext { subject: claims.sub, organization: claims.org, permissions: claims.perm })
    }
}

/// Extracts the token from a `Bearer` authorization header.
///
/// The scheme is matched case-insensitively. Returns `None` for a missing
/// header, another scheme, or an empty token.
#[must_use]
pub fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    let value = authorization?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Required scopes not present in `granted`.
#[must_use]
pub fn missing_scopes(required: &BTreeSet<String>, granted: &BTreeSet<String>) -> BTreeSet<String> {
    required.difference(granted).cloned().collect()
}
