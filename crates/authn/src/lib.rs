//! # vendorsim authentication
//!
//! Bearer-token issuance, verification and scope authorization for the vendor
//! API simulator.
//!
//! This crate provides:
//! - **Token service**: mints and verifies EdDSA-signed JWS tokens with one
//!   Ed25519 key generated at startup
//! - **Key set**: the public half of that key, published as a JWKS document
//! - **Scope authorizer**: all-required scope checks against the `perm` claim
//! - **Header validation**: algorithm and key id checks
//!
//! ## Example
//!
//! ```no_run
//! use std::{collections::BTreeSet, sync::Arc};
//! use vendorsim_authn::{ScopeAuthorizer, TokenService};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tokens = Arc::new(TokenService::builder().build());
//! let authorizer = ScopeAuthorizer::new(tokens.clone());
//!
//! let token = tokens.issue("user-1", "org-1", ["filesystems:read"])?;
//! let required: BTreeSet<String> = ["filesystems:read".to_owned()].into();
//! let ctx = authorizer.authorize(Some(&format!("Bearer {token}")), &required)?;
//!
//! println!("authorized {} in {}", ctx.subject, ctx.organization);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Authentication error types.
pub mod error;
/// Token issuance and verification.
pub mod jwt;
/// Signing identity and published key set.
pub mod keys;
/// Scope authorization.
pub mod scope;
/// Header validation.
pub mod validation;

/// Shared test helpers.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use error::{AuthError, Result};
pub use jwt::{DEFAULT_AUDIENCE, DEFAULT_ISSUER, TokenClaims, TokenService};
pub use keys::{KeySet, PublicJwk, SigningIdentity};
pub use scope::{AuthContext, ScopeAuthorizer};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
