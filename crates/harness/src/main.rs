use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use humantime_serde::re::humantime;
use tracing_subscriber::EnvFilter;
use vendorsim_harness::{BackendMode, ConfigOverrides, Harness, HarnessConfig, server};

#[derive(Debug, Parser)]
#[command(name = "vendorsim")]
#[command(about = "Simulated, authenticated storage-vendor REST API for load and chaos testing")]
struct Args {
    /// TOML configuration file; flags and environment variables override it.
    #[arg(long, env = "VENDORSIM_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "VENDORSIM_LISTEN")]
    listen: Option<SocketAddr>,

    /// Port to listen on, keeping the configured host.
    #[arg(long, env = "VENDORSIM_PORT")]
    port: Option<u16>,

    /// Backend answering vendor operations.
    #[arg(long, value_enum, env = "VENDORSIM_MODE")]
    mode: Option<BackendMode>,

    /// API contract document (YAML, or JSON when the file ends in `.json`).
    #[arg(long, env = "VENDORSIM_CONTRACT")]
    contract: Option<PathBuf>,

    /// Prefix under which the vendor API is served.
    #[arg(long, env = "VENDORSIM_BASE_PATH")]
    base_path: Option<String>,

    /// Lifetime of issued tokens, e.g. `30m` or `1h`.
    #[arg(long, env = "VENDORSIM_TOKEN_TTL", value_parser = humantime::parse_duration)]
    token_ttl: Option<Duration>,

    /// Hex-encoded 32-byte seed for a reproducible signing key.
    #[arg(long, env = "VENDORSIM_SIGNING_SEED")]
    signing_seed: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "VENDORSIM_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            listen: self.listen,
            port: self.port,
            mode: self.mode,
            contract: self.contract.clone(),
            base_path: self.base_path.clone(),
            token_ttl: self.token_ttl,
            signing_seed: self.signing_seed.clone(),
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let file_config = match &args.config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    let config = args.overrides().apply(file_config).context("invalid configuration")?;

    let harness = Harness::from_config(&config).context("assembling the harness")?;
    server::serve(Arc::new(harness), &config).await.context("serving the vendor API")?;
    Ok(())
}
