/// Configuration loading from a TOML file with `CHARTLINK_*` environment overrides
use std::path::Path;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};

use crate::error::{BridgeError, Result};
use crate::types::Settings;

pub const ENV_PREFIX: &str = "CHARTLINK";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(BridgeError::ConfigError(format!(
            "Failed to read config file: {} not found",
            path.display()
        )));
    }

    build_settings(Config::builder().add_source(File::from(path).required(true)))
}

/// Load from TOML text; environment overrides still apply
pub fn load_config_str(content: &str) -> Result<Settings> {
    build_settings(Config::builder().add_source(File::from_str(content, FileFormat::Toml)))
}

fn build_settings(builder: ConfigBuilder<DefaultState>) -> Result<Settings> {
    // e.g. CHARTLINK_DATAFEED_URL, CHARTLINK_SYMBOL_GROUPS=NYSE,FOREX
    let environment = Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("symbol_groups")
        .with_list_parse_key("watch_symbols");

    let settings: Settings = builder
        .add_source(environment)
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| BridgeError::ConfigError(format!("Failed to parse config: {}", e)))?;

    validate_config(&settings)?;

    Ok(settings)
}

pub fn validate_config(settings: &Settings) -> Result<()> {
    if settings.datafeed_url.trim().is_empty() {
        return Err(BridgeError::ConfigError("datafeed_url is empty".to_string()));
    }

    if settings.quote_update_interval_secs == 0 || settings.quote_fast_update_interval_secs == 0 {
        return Err(BridgeError::ConfigError(format!(
            "Quote intervals must be positive (got {}s / {}s)",
            settings.quote_update_interval_secs, settings.quote_fast_update_interval_secs
        )));
    }

    if settings.http_timeout_secs == 0 {
        return Err(BridgeError::ConfigError("http_timeout_secs must be positive".to_string()));
    }

    if settings.symbol_groups.is_empty() {
        return Err(BridgeError::ConfigError("symbol_groups is empty".to_string()));
    }

    Ok(())
}
