//! Shared test utilities for authentication testing.
//!
//! Helpers for building token services with fixed keys, crafting raw JWT
//! strings (for attack testing) and corrupting signatures. Feature-gated behind
//! `testutil` to keep them out of production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! vendorsim-authn = { path = "../authn", features = ["testutil"] }
//! ```

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::{jwt::TokenService, keys::SigningIdentity, scope::ScopeAuthorizer};

/// Seed used by [`seeded_token_service`].
pub const TEST_SEED: [u8; 32] = [42u8; 32];

/// Token service with a key derived from [`TEST_SEED`].
#[must_use]
pub fn seeded_token_service() -> Arc<TokenService> {
    Arc::new(TokenService::builder().identity(SigningIdentity::from_seed(&TEST_SEED)).build())
}

/// Authorizer over a freshly generated token service.
#[must_use]
pub fn test_authorizer() -> ScopeAuthorizer {
    ScopeAuthorizer::new(Arc::new(TokenService::builder().build()))
}

/// Formats `token` as an `Authorization` header value.
#[must_use]
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The result has the shape `{header_b64}.{payload_b64}.` with an empty
/// signature, for testing rejection of `alg: "none"` and similar tokens.
///
/// # Panics
///
/// Panics if JSON serialization fails.
#[allow(clippy::expect_used)]
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Flips one bit of the decoded signature at `index` (modulo its length) and
/// re-encodes the token.
///
/// # Panics
///
/// Panics if `token` does not have a base64url signature segment.
#[allow(clippy::expect_used)]
pub fn tamper_signature(token: &str, index: usize) -> String {
    let (signed, signature) = token.rsplit_once('.').expect("token has a signature segment");
    let mut bytes = URL_SAFE_NO_PAD.decode(signature).expect("signature is base64url");
    assert!(!bytes.is_empty(), "signature segment is empty");
    let at = index % bytes.len();
    bytes[at] ^= 0x01;
    format!("{signed}.{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Asserts that a [`Result<T, AuthError>`] is an `Err` matching the given
/// [`AuthError`] variant.
///
/// [`AuthError`]: crate::error::AuthError
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use vendorsim_authn::assert_auth_error;
/// use vendorsim_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::token_expired());
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
