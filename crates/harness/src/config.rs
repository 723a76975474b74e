//! Startup configuration for the harness.
//!
//! [`HarnessConfig`] is read once at startup from an optional TOML file and
//! then overlaid with command-line flags and `VENDORSIM_*` environment
//! variables (see [`ConfigOverrides`]). It is immutable once the server starts.

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    backend::BackendMode,
    error::{HarnessError, HarnessResult},
};

/// Default listen address (`127.0.0.1:8080`).
pub const DEFAULT_LISTEN: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);

/// Default prefix under which the vendor API is served.
pub const DEFAULT_BASE_PATH: &str = "/api/v2";

/// Default maximum request body size (1 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Harness startup configuration.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use vendorsim_harness::{BackendMode, HarnessConfig};
///
/// let config = HarnessConfig::builder()
///     .mode(BackendMode::Mock)
///     .token_ttl(Duration::from_secs(3600))
///     .build()?;
/// assert_eq!(config.base_path(), "/api/v2");
/// # Ok::<(), vendorsim_harness::HarnessError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    /// Socket address the HTTP server binds to.
    #[serde(default = "default_listen")]
    pub(crate) listen: SocketAddr,

    /// Backend answering vendor operations.
    #[serde(default)]
    pub(crate) mode: BackendMode,

    /// Contract document path; the bundled contract is used when absent.
    #[serde(default)]
    pub(crate) contract: Option<PathBuf>,

    /// Prefix of every vendor API path.
    #[serde(default = "default_base_path")]
    pub(crate) base_path: String,

    /// Maximum accepted request body size in bytes.
    #[serde(default = "default_body_limit")]
    pub(crate) body_limit: usize,

    /// Lifetime of issued tokens; tokens never expire when unset.
    #[serde(default, with = "humantime_serde")]
    pub(crate) token_ttl: Option<Duration>,

    /// Hex-encoded 32-byte Ed25519 seed for reproducible key material.
    #[serde(default)]
    pub(crate) signing_seed: Option<String>,
}

fn default_listen() -> SocketAddr {
    DEFAULT_LISTEN
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_owned()
}

fn default_body_limit() -> usize {
    DEFAULT_BODY_LIMIT
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN,
            mode: BackendMode::default(),
            contract: None,
            base_path: default_base_path(),
            body_limit: DEFAULT_BODY_LIMIT,
            token_ttl: None,
            signing_seed: None,
        }
    }
}

#[bon::bon]
impl HarnessConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if validation fails (see [`HarnessConfig::validate`]).
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_LISTEN)] listen: SocketAddr,
        #[builder(default)] mode: BackendMode,
        #[builder(into)] contract: Option<PathBuf>,
        #[builder(into, default = String::from(DEFAULT_BASE_PATH))] base_path: String,
        #[builder(default = DEFAULT_BODY_LIMIT)] body_limit: usize,
        token_ttl: Option<Duration>,
        #[builder(into)] signing_seed: Option<String>,
    ) -> HarnessResult<Self> {
        let config =
            Self { listen, mode, contract, base_path, body_limit, token_ttl, signing_seed };
        config.validate()?;
        Ok(config)
    }
}

impl HarnessConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] for syntax errors, unknown keys or
    /// invalid values.
    pub fn from_toml_str(document: &str) -> HarnessResult<Self> {
        let config: Self = toml::from_str(document)
            .map_err(|e| HarnessError::config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Io`] if the file cannot be read, or
    /// [`HarnessError::Config`] if its content is invalid.
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let document = std::fs::read_to_string(path)?;
        Self::from_toml_str(&document)
            .map_err(|e| HarnessError::config(format!("{}: {e}", path.display())))
    }

    /// Checks field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if:
    /// - `body_limit` is zero
    /// - `base_path` does not start with `/` or ends with `/` (other than `/` itself)
    /// - `signing_seed` is not exactly 64 hex characters
    /// - `token_ttl` is zero
    pub fn validate(&self) -> HarnessResult<()> {
        if self.body_limit == 0 {
            return Err(HarnessError::config("body_limit must be greater than zero"));
        }
        if !self.base_path.starts_with('/') {
            return Err(HarnessError::config(format!(
                "base_path must start with '/', got {:?}",
                self.base_path
            )));
        }
        if self.base_path.len() > 1 && self.base_path.ends_with('/') {
            return Err(HarnessError::config(format!(
                "base_path must not end with '/', got {:?}",
                self.base_path
            )));
        }
        if self.token_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(HarnessError::config("token_ttl must be greater than zero"));
        }
        self.seed()?;
        Ok(())
    }

    /// Decodes the configured signing seed.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if the seed is not 64 hex characters.
    pub fn seed(&self) -> HarnessResult<Option<[u8; 32]>> {
        let Some(encoded) = self.signing_seed.as_deref() else {
            return Ok(None);
        };
        let bytes = hex::decode(encoded)
            .map_err(|e| HarnessError::config(format!("signing_seed is not hex: {e}")))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            HarnessError::config(format!("signing_seed must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Some(seed))
    }

    /// Returns the listen address.
    #[must_use]
    pub fn listen(&self) -> SocketAddr {
        self.listen
    }

    /// Returns the backend mode.
    #[must_use]
    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    /// Returns the contract path, if one is configured.
    #[must_use]
    pub fn contract(&self) -> Option<&Path> {
        self.contract.as_deref()
    }

    /// Returns the vendor API base path.
    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Returns the request body limit in bytes.
    #[must_use]
    pub fn body_limit(&self) -> usize {
        self.body_limit
    }

    /// Returns the token lifetime, if configured.
    #[must_use]
    pub fn token_ttl(&self) -> Option<Duration> {
        self.token_ttl
    }
}

/// Values that take precedence over the configuration file.
///
/// Populated from command-line flags and environment variables; `None`
/// leaves the file (or default) value untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Replaces the whole listen address.
    pub listen: Option<SocketAddr>,
    /// Replaces only the listen port.
    pub port: Option<u16>,
    /// Backend mode.
    pub mode: Option<BackendMode>,
    /// Contract document path.
    pub contract: Option<PathBuf>,
    /// Vendor API base path.
    pub base_path: Option<String>,
    /// Token lifetime.
    pub token_ttl: Option<Duration>,
    /// Hex-encoded signing seed.
    pub signing_seed: Option<String>,
}

impl ConfigOverrides {
    /// Applies the overrides to `config` and re-validates it.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if the merged configuration is invalid.
    pub fn apply(self, mut config: HarnessConfig) -> HarnessResult<HarnessConfig> {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(port) = self.port {
            config.listen.set_port(port);
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(contract) = self.contract {
            config.contract = Some(contract);
        }
        if let Some(base_path) = self.base_path {
            config.base_path = base_path;
        }
        if let Some(ttl) = self.token_ttl {
            config.token_ttl = Some(ttl);
        }
        if let Some(seed) = self.signing_seed {
            config.signing_seed = Some(seed);
        }
        config.validate()?;
        Ok(config)
    }
}
