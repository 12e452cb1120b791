use anyhow::Result;
use config::Config;
use serde::Deserialize;

use crate::constants;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub window: WindowConfig,
    pub expansion: ExpansionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Spans retained once the cache window is consolidated.
    pub max_spans: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpansionConfig {
    /// Navigation debounce before an expansion fires.
    pub debounce_ms: u64,
    /// Padding around the focused month for expansion targets.
    pub pad_days: i64,
    /// Occurrences emitted per expander call before yielding.
    pub emit_limit: usize,
    /// Ensure-expanded passes before an exhaustion error.
    pub max_passes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Settings {
    /// ## Summary
    /// Loads configuration from `.env` file and environment variables into a `Settings`.
    /// Environment variables take precedence over `.env` file values.
    ///
    /// ## Errors
    /// Returns an error if building the configuration or deserializing it fails.
    pub fn load() -> Result<Self> {
        Ok(Config::builder()
            .set_default("window.max_spans", u64::try_from(constants::MAX_SPANS)?)?
            .set_default("expansion.debounce_ms", constants::DEBOUNCE_MS)?
            .set_default("expansion.pad_days", constants::EXPANSION_PAD_DAYS)?
            .set_default("expansion.emit_limit", u64::try_from(constants::EMIT_LIMIT)?)?
            .set_default("expansion.max_passes", u64::from(constants::MAX_EXPANSION_PASSES))?
            .set_default("logging.level", "debug")?
            // Env file
            .add_source(
                config::Environment::default()
                    .convert_case(config::Case::Snake)
                    .separator("_")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            // TOML file
            .add_source(config::File::with_name("config.toml").required(false))
            .build()?
            .try_deserialize::<Settings>()?)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            window: WindowConfig {
                max_spans: constants::MAX_SPANS,
            },
            expansion: ExpansionConfig {
                debounce_ms: constants::DEBOUNCE_MS,
                pad_days: constants::EXPANSION_PAD_DAYS,
                emit_limit: constants::EMIT_LIMIT,
                max_passes: constants::MAX_EXPANSION_PASSES,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
            },
        }
    }
}

/// ## Summary
/// Loads configuration from environment variables and `.env` file.
///
/// ## Errors
/// Returns an error if loading or deserializing the configuration fails.
pub fn load_config() -> Result<Settings> {
    dotenvy::dotenv().ok();

    Settings::load()
}
