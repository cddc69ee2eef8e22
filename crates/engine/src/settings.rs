//! Configuration loading
//!
//! Layers, lowest first: built-in defaults, `gastrack.toml` (optional), `GASTRACK__*`
//! environment variables, then the per-network `<NETWORK>_WS_URL` endpoint overrides.

use std::path::Path;

use config::{Config, ConfigBuilder, Environment, File};
use config::builder::DefaultState;
use tracing::{debug, info};

use gastrack_core::EngineConfig;

pub const DEFAULT_CONFIG_FILE: &str = "gastrack.toml";

const ENV_PREFIX: &str = "GASTRACK";

/// Load from `gastrack.toml` in the working directory and the process environment
pub fn load() -> anyhow::Result<EngineConfig> {
    load_from(Path::new(DEFAULT_CONFIG_FILE))
}

pub fn load_from(path: &Path) -> anyhow::Result<EngineConfig> {
    let builder = defaults()?
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

    let config = finish(builder, |key| std::env::var(key).ok())?;
    info!("Loaded configuration ({} networks)", config.networks.len());
    Ok(config)
}

fn defaults() -> anyhow::Result<ConfigBuilder<DefaultState>> {
    Ok(Config::builder().add_source(Config::try_from(&EngineConfig::default())?))
}

fn finish(
    builder: ConfigBuilder<DefaultState>,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<EngineConfig> {
    let mut config: EngineConfig = builder.build()?.try_deserialize()?;
    apply_endpoint_overrides(&mut config, lookup);
    config.validate()?;
    Ok(config)
}

/// `ETHEREUM_WS_URL`, `POLYGON_WS_URL`, `ARBITRUM_WS_URL`
pub fn endpoint_var(chain_name: &str) -> String {
    format!("{}_WS_URL", chain_name.to_uppercase())
}

/// Replace each network's endpoint with its `<NETWORK>_WS_URL` value when set
pub fn apply_endpoint_overrides(config: &mut EngineConfig, lookup: impl Fn(&str) -> Option<String>) {
    for network in &mut config.networks {
        let var = endpoint_var(network.chain.name());
        if let Some(url) = lookup(&var).filter(|u| !u.trim().is_empty()) {
            debug!("{} endpoint from {}", network.chain, var);
            network.ws_url = url.trim().to_string();
        }
    }
}
