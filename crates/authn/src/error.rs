//! Authentication error types.
//!
//! This module defines errors that can occur while issuing, verifying and
//! authorizing bearer tokens.

use std::collections::BTreeSet;

use thiserror::Error;

/// Authentication and authorization errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No bearer credential was presented.
    #[error("Missing bearer credential")]
    MissingCredential,

    /// Token cannot be decoded into header, claims and signature.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Algorithm not in allowed list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Token names a key id that is not in the published key set.
    #[error("Unknown signing key: {kid}")]
    UnknownKey {
        /// Key ID from the token header.
        kid: String,
    },

    /// A fixed claim does not carry the value this service issues.
    #[error("Claim '{claim}' mismatch: expected '{expected}', got '{actual}'")]
    ClaimMismatch {
        /// Claim name (`iss` or `aud`).
        claim: &'static str,
        /// Value this service expects.
        expected: String,
        /// Value found in the token.
        actual: String,
    },

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Token is valid but lacks scopes the operation requires.
    #[error("Insufficient scope, missing: {}", join_scopes(.missing))]
    InsufficientScope {
        /// Required scopes absent from the token, in sorted order.
        missing: BTreeSet<String>,
    },

    /// Signing key material could not be constructed.
    #[error("Invalid key material: {0}")]
    KeyMaterial(String),
}

fn join_scopes(scopes: &BTreeSet<String>) -> String {
    scopes.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

impl AuthError {
    /// Creates a [`AuthError::MissingCredential`] error.
    #[must_use]
    pub fn missing_credential() -> Self {
        Self::MissingCredential
    }

    /// Creates a [`AuthError::MalformedToken`] error.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedToken(reason.into())
    }

    /// Creates a [`AuthError::InvalidSignature`] error.
    #[must_use]
    pub fn invalid_signature() -> Self {
        Self::InvalidSignature
    }

    /// Creates a [`AuthError::UnknownKey`] error.
    #[must_use]
    pub fn unknown_key(kid: impl Into<String>) -> Self {
        Self::UnknownKey { kid: kid.into() }
    }

    /// Creates a [`AuthError::ClaimMismatch`] error.
    #[must_use]
    pub fn claim_mismatch(
        claim: &'static str,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ClaimMismatch { claim, expected: expected.into(), actual: actual.into() }
    }

    /// Creates a [`AuthError::TokenExpired`] error.
    #[must_use]
    pub fn token_expired() -> Self {
        Self::TokenExpired
    }

    /// Creates a [`AuthError::InsufficientScope`] error.
    #[must_use]
    pub fn insufficient_scope(missing: BTreeSet<String>) -> Self {
        Self::InsufficientScope { missing }
    }

    /// Short, stable label for the error kind, used as a log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::MalformedToken(_) => "malformed_token",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::InvalidSignature => "invalid_signature",
            Self::UnknownKey { .. } => "unknown_key",
            Self::ClaimMismatch { .. } => "claim_mismatch",
            Self::TokenExpired => "token_expired",
            Self::InsufficientScope { .. } => "insufficient_scope",
            Self::KeyMaterial(_) => "key_material",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => AuthError::MalformedToken("Invalid JWT structure".into()),
            // Header and claims segments are decoded before signature checks run,
            // so a base64 failure at that stage belongs to the signature segment.
            ErrorKind::InvalidSignature | ErrorKind::Base64(_) => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidAlgorithm => {
                AuthError::UnsupportedAlgorithm("Algorithm not supported".into())
            },
            ErrorKind::InvalidKeyFormat => {
                AuthError::KeyMaterial(format!("JWT key error: {}", err))
            },
            _ => AuthError::MalformedToken(format!("JWT error: {}", err)),
        }
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::MalformedToken("test".into());
        assert_eq!(err.to_string(), "Malformed token: test");

        let err = AuthError::TokenExpired;
        assert_eq!(err.to_string(), "Token expired");

        let err = AuthError::unknown_key("key-123");
        assert_eq!(err.to_string(), "Unknown signing key: key-123");
    }

    #[test]
    fn test_claim_mismatch_display() {
        let err = AuthError::claim_mismatch("aud", "vendorsim-clients", "someone-else");
        assert_eq!(
            err.to_string(),
            "Claim 'aud' mismatch: expected 'vendorsim-clients', got 'someone-else'"
        );
    }

    #[test]
    fn test_insufficient_scope_lists_missing_in_order() {
        let missing: BTreeSet<String> =
            ["users:write", "filesystems:read"].into_iter().map(String::from).collect();
        let err = AuthError::insufficient_scope(missing);
        assert_eq!(err.to_string(), "Insufficient scope, missing: filesystems:read users:write");
        assert_eq!(err.kind(), "insufficient_scope");
    }

    #[test]
    fn test_error_from_jsonwebtoken() {
        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::ExpiredSignature);
        let auth_err: AuthError = jwt_err.into();
        assert!(matches!(auth_err, AuthError::TokenExpired));

        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidSignature);
        let auth_err: AuthError = jwt_err.into();
        assert!(matches!(auth_err, AuthError::InvalidSignature));

        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidToken);
        let auth_err: AuthError = jwt_err.into();
        assert!(matches!(auth_err, AuthError::MalformedToken(_)));
    }

    #[test]
    fn test_key_format_errors_are_key_material() {
        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidKeyFormat);
        let auth_err: AuthError = jwt_err.into();
        assert!(matches!(auth_err, AuthError::KeyMaterial(_)), "got: {auth_err:?}");
        assert_eq!(auth_err.kind(), "key_material");
    }

    #[test]
    fn test_kind_labels_are_distinct() {
        let errors = [
            AuthError::missing_credential(),
            AuthError::malformed("x"),
            AuthError::UnsupportedAlgorithm("none".into()),
            AuthError::invalid_signature(),
            AuthError::unknown_key("k"),
            AuthError::claim_mismatch("iss", "a", "b"),
            AuthError::token_expired(),
            AuthError::insufficient_scope(BTreeSet::new()),
            AuthError::KeyMaterial("bad".into()),
        ];
        let kinds: BTreeSet<&str> = errors.iter().map(AuthError::kind).collect();
        assert_eq!(kinds.len(), errors.len());
    }
}
