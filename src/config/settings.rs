use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_CORS_ALLOW_METHOD: &str = "GET";

/// Top-level configuration settings for the service.
///
/// Includes settings for the HTTP listener, the hub and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub log: LogSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the server will bind to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Configuration settings for the hub and its subscribers.
#[derive(Debug, Deserialize, Clone)]
pub struct HubSettings {
    /// Deadline for a single write to a subscriber, in milliseconds.
    pub timeout_ms: u64,
    pub auth_token: String,
    pub cors_allow_origin: String,
    pub cors_allow_method: Vec<String>,
    /// Depth of the dispatcher's request queue.
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

impl HubSettings {
    /// Per-write deadline; zero falls back to the default.
    pub fn timeout(&self) -> Duration {
        if self.timeout_ms == 0 {
            Duration::from_millis(DEFAULT_TIMEOUT_MS)
        } else {
            Duration::from_millis(self.timeout_ms)
        }
    }

    pub fn auth_token(&self) -> &str {
        self.auth_token.trim()
    }

    pub fn cors_allow_origin(&self) -> &str {
        &self.cors_allow_origin
    }

    /// Allowed methods as sent in the `Access-Control-Allow-Method` header.
    pub fn cors_allow_method(&self) -> String {
        if self.cors_allow_method.is_empty() {
            DEFAULT_CORS_ALLOW_METHOD.to_string()
        } else {
            self.cors_allow_method.join(", ")
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            auth_token: String::new(),
            cors_allow_origin: "127.0.0.1".to_string(),
            cors_allow_method: vec![DEFAULT_CORS_ALLOW_METHOD.to_string()],
            queue_capacity: 1024,
        }
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional; missing values are filled from defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub hub: Option<PartialHubSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialHubSettings {
    pub timeout_ms: Option<u64>,
    pub auth_token: Option<String>,
    pub cors_allow_origin: Option<String>,
    pub cors_allow_method: Option<Vec<String>>,
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            hub: HubSettings::default(),
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
