mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{HubSettings, LogSettings, ServerSettings, Settings};

/// Default location of the optional configuration file (without extension).
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Loads the configuration from `path` (optional) and `SSEHUB__*`
/// environment variables, merged over `Settings::default()`.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("SSEHUB")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("hub.cors_allow_method")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let default = Settings::default();

    let server = partial.server;
    let hub = partial.hub;
    let log = partial.log;

    Ok(Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        hub: HubSettings {
            timeout_ms: hub
                .as_ref()
                .and_then(|h| h.timeout_ms)
                .unwrap_or(default.hub.timeout_ms),
            auth_token: hub
                .as_ref()
                .and_then(|h| h.auth_token.clone())
                .unwrap_or(default.hub.auth_token),
            cors_allow_origin: hub
                .as_ref()
                .and_then(|h| h.cors_allow_origin.clone())
                .unwrap_or(default.hub.cors_allow_origin),
            cors_allow_method: hub
                .as_ref()
                .and_then(|h| h.cors_allow_method.clone())
                .unwrap_or(default.hub.cors_allow_method),
            queue_capacity: hub
                .as_ref()
                .and_then(|h| h.queue_capacity)
                .filter(|capacity| *capacity > 0)
                .unwrap_or(default.hub.queue_capacity),
        },
        log: LogSettings {
            level: log
                .and_then(|l| l.level)
                .unwrap_or(default.log.level),
        },
    })
}
