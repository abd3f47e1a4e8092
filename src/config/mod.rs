use config::{Config, ConfigError, Environment, File, Map};
use serde::Deserialize;
use std::env;

/// Port used when neither `PORT` nor `APP_SERVER__PORT` is set.
pub const DEFAULT_PORT: u16 = 8123;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// Raw value; range-checked by `RelayServer::start`.
    pub port: i64,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Loads settings from `vars` instead of the process environment when given.
    pub fn load(vars: Option<Map<String, String>>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| match &vars {
            Some(vars) => vars.get(key).cloned(),
            None => env::var(key).ok(),
        };
        let run_mode = lookup("RUN_MODE").unwrap_or_else(|| "development".into());
        let port = lookup("PORT")
            .map(|port| port.trim().to_string())
            .filter(|port| !port.is_empty())
            .map(|port| {
                port.parse::<i64>().map_err(|e| {
                    ConfigError::Message(format!("PORT must be an integer, got {:?}: {}", port, e))
                })
            })
            .transpose()?;

        Config::builder()
            .set_default("environment", run_mode.as_str())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", i64::from(DEFAULT_PORT))?
            .set_default("server.workers", num_cpus::get() as i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // E.g., `APP_SERVER__HOST=127.0.0.1` would set `Settings.server.host`
            .add_source(
                Environment::with_prefix("app")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars.clone()),
            )
            // The bare `PORT` variable wins over everything else.
            .set_override_option("server.port", port)?
            .build()?
            .try_deserialize()
    }

    #[cfg(test)]
    pub fn new_for_test() -> Result<Self, ConfigError> {
        Self::load(Some(Map::from([(
            "RUN_MODE".to_string(),
            "test".to_string(),
        )])))
    }
}
