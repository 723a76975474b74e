//! Token issuance and verification.
//!
//! A [`TokenService`] owns one [`SigningIdentity`] for its whole lifetime and
//! both mints and checks compact EdDSA JWS tokens against the key set it
//! publishes. It is constructed explicitly and shared by `Arc`; there is no
//! process-wide instance.
//!
//! # Example
//!
//! ```no_run
//! use vendorsim_authn::jwt::TokenService;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = TokenService::builder().build();
//! let token = service.issue("user-1", "org-1", ["filesystems:read"])?;
//!
//! let claims = service.verify(&token)?;
//! assert_eq!(claims.sub, "user-1");
//! # Ok(())
//! # }
//! ```

use std::{collections::BTreeSet, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AuthError, Result},
    keys::{KeySet, SigningIdentity},
    validation::{validate_algorithm, validate_kid},
};

/// Issuer placed in every token minted by this harness.
pub const DEFAULT_ISSUER: &str = "https://vendorsim.local";

/// Audience placed in every token minted by this harness.
pub const DEFAULT_AUDIENCE: &str = "vendorsim-clients";

/// Claims carried by a bearer token.
///
/// ```json
/// {
///   "iss": "https://vendorsim.local",
///   "aud": "vendorsim-clients",
///   "sub": "b0f1c1c2-...",
///   "org": "00000000-0000-0000-0000-000000000000",
///   "perm": ["filesystems:read", "filesystems:write"],
///   "iat": 1700000000
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: String,
    /// Caller identity.
    pub sub: String,
    /// Organization the caller acts within.
    pub org: String,
    /// Granted permissions (scope strings), serialized in sorted order.
    #[serde(default)]
    pub perm: BTreeSet<String>,
    /// Issued at (seconds since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Expiration time (seconds since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// JOSE header fields inspected before any signature work.
///
/// Parsed by hand rather than through [`jsonwebtoken::decode_header`] so that
/// algorithms the library does not model (such as `none`) still produce
/// [`AuthError::UnsupportedAlgorithm`] instead of a parse failure.
#[derive(Debug, Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Self-contained issuer and verifier of signed bearer tokens.
pub struct TokenService {
    identity: SigningIdentity,
    key_set: KeySet,
    issuer: String,
    audience: String,
    ttl: Option<Duration>,
}

#[bon::bon]
impl TokenService {
    /// Creates a token service.
    ///
    /// Without an explicit identity a fresh Ed25519 key pair is generated.
    /// Issued tokens carry no `exp` claim unless a `ttl` is set.
    #[builder]
    pub fn new(
        identity: Option<SigningIdentity>,
        #[builder(into, default = String::from(DEFAULT_ISSUER))] issuer: String,
        #[builder(into, default = String::from(DEFAULT_AUDIENCE))] audience: String,
        ttl: Option<Duration>,
    ) -> Self {
        let identity = identity.unwrap_or_else(SigningIdentity::generate);
        let key_set = KeySet::single(&identity);
        Self { identity, key_set, issuer, audience, ttl }
    }
}

impl TokenService {
    /// Key id of the signing identity.
    #[must_use]
    pub fn kid(&self) -> &str {
        self.identity.kid()
    }

    /// Published verification keys.
    #[must_use]
    pub fn key_set(&self) -> &KeySet {
        &self.key_set
    }

    /// Issuer this service stamps and expects.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Audience this service stamps and expects.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Mints a token for `subject` within `organization` granting `scopes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be signed.
    #[tracing::instrument(skip(self, scopes), fields(kid = %self.identity.kid()))]
    pub fn issue<S>(
        &self,
        subject: &str,
        organization: &str,
        scopes: impl IntoIterator<Item = S>,
    ) -> Result<String>
    where
        S: Into<String>,
    {
        let now = Utc::now().timestamp() as u64;
        let claims = TokenClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: subject.to_owned(),
            org: organization.to_owned(),
            perm: scopes.into_iter().map(Into::into).collect(),
            iat: Some(now),
            exp: self.ttl.map(|ttl| now.saturating_add(ttl.as_secs())),
        };
        self.sign(&claims)
    }

    /// Signs arbitrary claims with this service's key.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be serialized or signed.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String> {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.identity.kid().to_owned());
        Ok(jsonwebtoken::encode(&header, claims, &self.identity.encoding_key())?)
    }

    /// Verifies a token and returns its claims.
    ///
    /// Checks run in a fixed order: structure, algorithm, key id, signature,
    /// audience, issuer, expiry. Scopes are not inspected.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`] if the token cannot be decoded or has no `kid`
    /// - [`AuthError::UnsupportedAlgorithm`] for anything other than EdDSA
    /// - [`AuthError::UnknownKey`] if `kid` is not in the published key set
    /// - [`AuthError::InvalidSignature`] if the signature does not verify
    /// - [`AuthError::ClaimMismatch`] if `aud` or `iss` differ from this service's
    /// - [`AuthError::TokenExpired`] if `exp` is present and not in the future
    #[tracing::instrument(skip(self, token))]
    pub fn verify(&self, token: &str) -> Result<TokenClaims> {
        let header = decode_token_header(token)?;
        validate_algorithm(&header.alg)?;

        let kid = header.kid.ok_or_else(|| AuthError::malformed("JWT header is missing 'kid'"))?;
        validate_kid(&kid)?;

        // Surfaces claim-shape problems as malformed before any key lookup.
        decode_token_claims(token)?;

        let jwk = self.key_set.find(&kid).ok_or_else(|| AuthError::unknown_key(&kid))?;
        let claims = verify_signature(token, &jwk.decoding_key()?)?;

        self.check_fixed_claims(&claims)?;
        Ok(claims)
    }

    fn check_fixed_claims(&self, claims: &TokenClaims) -> Result<()> {
        if claims.aud != self.audience {
            return Err(AuthError::claim_mismatch("aud", &self.audience, &claims.aud));
        }
        if claims.iss != self.issuer {
            return Err(AuthError::claim_mismatch("iss", &self.issuer, &claims.iss));
        }

        let now = Utc::now().timestamp() as u64;
        if let Some(exp) = claims.exp
            && exp <= now
        {
            return Err(AuthError::token_expired());
        }

        Ok(())
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("kid", &self.identity.kid())
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn split_token(token: &str) -> Result<[&str; 3]> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(claims), Some(signature), None) => Ok([header, claims, signature]),
        _ => Err(AuthError::malformed("JWT must have 3 parts separated by dots")),
    }
}

fn decode_token_header(token: &str) -> Result<RawHeader> {
    let [header, _, _] = split_token(token)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| AuthError::malformed(format!("Failed to decode JWT header: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::malformed(format!("Failed to parse JWT header: {}", e)))
}

/// Decodes token claims without verifying the signature.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the token does not have three
/// segments or the payload is not valid base64url-encoded claims JSON.
pub fn decode_token_claims(token: &str) -> Result<TokenClaims> {
    let [_, claims, _] = split_token(token)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(claims)
        .map_err(|e| AuthError::malformed(format!("Failed to decode JWT payload: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::malformed(format!("Failed to parse JWT claims: {}", e)))
}

fn verify_signature(token: &str, key: &DecodingKey) -> Result<TokenClaims> {
    let mut validation = Validation::new(Algorithm::EdDSA);
    // Expiry, issuer and audience are checked by the service itself so that
    // tokens without `exp` stay valid and mismatches report the claim.
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let token_data = decode::<TokenClaims>(token, key, &validation)?;
    Ok(token_data.claims)
}
