//! Signing identity and published key set.
//!
//! A [`SigningIdentity`] holds the single Ed25519 key pair a token service
//! signs with. Only its public half leaves the process, as a one-entry
//! [`KeySet`] in JWKS form.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{PUBLIC_KEY_LENGTH, SigningKey, VerifyingKey};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{AuthError, Result};

/// PKCS#8 v1 prefix for a bare Ed25519 private key (RFC 8410).
const ED25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, // SEQUENCE, 46 bytes
    0x02, 0x01, 0x00, // INTEGER version 0
    0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
    0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
    0x04, 0x22, // OCTET STRING, 34 bytes
    0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
];

/// Ed25519 key pair with a stable key identifier.
///
/// The private key is kept only as PKCS#8 DER inside [`Zeroizing`], so it is
/// scrubbed from memory when the identity is dropped.
pub struct SigningIdentity {
    kid: String,
    pkcs8_der: Zeroizing<Vec<u8>>,
    public_key: [u8; PUBLIC_KEY_LENGTH],
}

impl SigningIdentity {
    /// Generates a fresh identity from the operating system RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_signing_key(&SigningKey::generate(&mut OsRng))
    }

    /// Builds an identity from a fixed 32-byte seed.
    ///
    /// The same seed always yields the same key pair and key id.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(&SigningKey::from_bytes(seed))
    }

    fn from_signing_key(signing_key: &SigningKey) -> Self {
        let public_key = signing_key.verifying_key().to_bytes();

        let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
        let mut pkcs8_der = Zeroizing::new(ED25519_PKCS8_PREFIX.to_vec());
        pkcs8_der.extend_from_slice(&*private_bytes);

        Self { kid: jwk_thumbprint(&public_key), pkcs8_der, public_key }
    }

    /// Key identifier placed in every token header.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The public half as a JWK.
    #[must_use]
    pub fn public_jwk(&self) -> PublicJwk {
        PublicJwk::ed25519(self.kid.clone(), &self.public_key)
    }

    pub(crate) fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ed_der(&self.pkcs8_der)
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("kid", &self.kid)
            .field("public_key", &URL_SAFE_NO_PAD.encode(self.public_key))
            .finish_non_exhaustive()
    }
}

/// RFC 7638 thumbprint of an Ed25519 public key.
///
/// Members are hashed in lexicographic order with no whitespace, as the RFC
/// requires, so the result is stable for a given key.
fn jwk_thumbprint(public_key: &[u8; PUBLIC_KEY_LENGTH]) -> String {
    let canonical = format!(
        r#"{{"crv":"Ed25519","kty":"OKP","x":"{}"}}"#,
        URL_SAFE_NO_PAD.encode(public_key)
    );
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

/// Public signing key in JSON Web Key form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    /// Key type, always `OKP`.
    pub kty: String,
    /// Curve, always `Ed25519`.
    pub crv: String,
    /// Algorithm, always `EdDSA`.
    pub alg: String,
    /// Intended use, always `sig`.
    #[serde(rename = "use")]
    pub key_use: String,
    /// Key identifier.
    pub kid: String,
    /// Base64url (unpadded) public key bytes.
    pub x: String,
}

impl PublicJwk {
    fn ed25519(kid: String, public_key: &[u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self {
            kty: "OKP".to_owned(),
            crv: "Ed25519".to_owned(),
            alg: "EdDSA".to_owned(),
            key_use: "sig".to_owned(),
            kid,
            x: URL_SAFE_NO_PAD.encode(public_key),
        }
    }

    /// Builds a [`DecodingKey`] for this JWK.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterial`] when the key is not an Ed25519 key or
    /// `x` does not decode to a valid curve point.
    pub fn decoding_key(&self) -> Result<DecodingKey> {
        if self.kty != "OKP" || self.crv != "Ed25519" {
            return Err(AuthError::KeyMaterial(format!(
                "unsupported key type {}/{}",
                self.kty, self.crv
            )));
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(&self.x)
            .map_err(|e| AuthError::KeyMaterial(format!("invalid base64 in x: {e}")))?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|v: Vec<u8>| {
            AuthError::KeyMaterial(format!(
                "public key must be {PUBLIC_KEY_LENGTH} bytes, got {}",
                v.len()
            ))
        })?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| AuthError::KeyMaterial(format!("invalid Ed25519 point: {e}")))?;

        DecodingKey::from_ed_components(&self.x).map_err(AuthError::from)
    }
}

/// Published verification keys (JWKS document).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeySet {
    /// Keys in publication order.
    pub keys: Vec<PublicJwk>,
}

impl KeySet {
    /// Key set containing exactly the given identity's public key.
    #[must_use]
    pub fn single(identity: &SigningIdentity) -> Self {
        Self { keys: vec![identity.public_jwk()] }
    }

    /// Looks up a key by id.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&PublicJwk> {
        self.keys.iter().find(|key| key.kid == kid)
    }
}
