//! Token header validation.
//!
//! Checks applied to the JOSE header before any key lookup or signature work.
//! Only EdDSA is accepted; `none` and the HMAC family are always refused, with
//! a message that says so.

use crate::error::AuthError;

/// Algorithms that are never accepted.
///
/// - `none`: no signature at all
/// - `HS256`, `HS384`, `HS512`: symmetric, the verifier would need the signing secret
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Accepted algorithms. The harness signs with a single Ed25519 key.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["EdDSA"];

/// Longest key id accepted in a token header.
pub const MAX_KID_LENGTH: usize = 256;

/// Validate a token's `alg` header value.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if the algorithm is forbidden or
/// not in [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use vendorsim_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("ES256").is_err());
/// assert!(validate_algorithm("HS256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{}' is not allowed for security reasons",
            alg
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{}' is not in accepted list (only EdDSA is supported)",
            alg
        )));
    }

    Ok(())
}

/// Validate a token's `kid` header value.
///
/// The id is only checked for shape here; whether it names a published key is
/// decided by the key set.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the id is empty, longer than
/// [`MAX_KID_LENGTH`], or contains control characters.
pub fn validate_kid(kid: &str) -> Result<(), AuthError> {
    if kid.is_empty() {
        return Err(AuthError::malformed("JWT header 'kid' is empty"));
    }
    if kid.len() > MAX_KID_LENGTH {
        return Err(AuthError::malformed(format!(
            "JWT header 'kid' exceeds {MAX_KID_LENGTH} bytes"
        )));
    }
    if kid.chars().any(char::is_control) {
        return Err(AuthError::malformed("JWT header 'kid' contains control characters"));
    }
    Ok(())
}
