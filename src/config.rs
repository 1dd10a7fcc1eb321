use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path_prefix: default_path_prefix(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8585
}

fn default_path_prefix() -> String {
    "/llm-websocket".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Callers admitted to the line. Empty means open to anyone.
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Backend model override in `provider/model` form.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            greeting: default_greeting(),
            allowlist: Vec::new(),
            response_timeout_ms: default_response_timeout_ms(),
            model: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_greeting() -> String {
    "Hi, you're through to the assistant. What can I do for you?".to_string()
}

fn default_response_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Agent gateway WebSocket URL, e.g. ws://127.0.0.1:9099
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env from the same directory as config.toml
        let env_path = config_dir().join(".env");
        match dotenvy::from_path(&env_path) {
            Ok(()) => tracing::info!("Loaded .env from {}", env_path.display()),
            Err(dotenvy::Error::Io(_)) => {
                tracing::debug!(
                    "No .env file at {}, using environment only",
                    env_path.display()
                );
            }
            Err(e) => tracing::warn!("Failed to parse .env: {e}"),
        }

        let path = config_path();
        tracing::info!("Loading config from {}", path.display());

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            format!(
                "Failed to read config at {}: {}. Create it with at least a [gateway] url",
                path.display(),
                e
            )
        })?;

        let mut config: Config = toml::from_str(&contents)?;

        // Env var overrides for secrets
        if let Ok(v) = std::env::var("GATEWAY_URL") {
            config.gateway.url = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_TOKEN") {
            config.gateway.token = Some(v);
        }

        Ok(config)
    }

    #[cfg(test)]
    pub fn for_tests(gateway_url: &str) -> Self {
        Self {
            server: ServerConfig::default(),
            bridge: BridgeConfig::default(),
            gateway: GatewayConfig {
                url: gateway_url.to_string(),
                token: None,
            },
        }
    }
}

/// Where the key→backend-session mapping is persisted.
pub fn session_store_path() -> PathBuf {
    config_dir().join("sessions.json")
}

fn config_dir() -> PathBuf {
    if let Ok(p) = std::env::var("VOICE_RELAY_CONFIG") {
        // If pointing to a file, use its parent directory
        let path = PathBuf::from(p);
        return path.parent().map(|p| p.to_path_buf()).unwrap_or(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".voice-relay")
}

fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("VOICE_RELAY_CONFIG") {
        return PathBuf::from(p);
    }

    config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            url = "ws://127.0.0.1:9099"
            "#,
        )
        .unwrap();

        assert!(config.bridge.enabled);
        assert!(config.bridge.allowlist.is_empty());
        assert_eq!(config.bridge.response_timeout_ms, 30_000);
        assert_eq!(config.bridge.model, None);
        assert_eq!(config.server.path_prefix, "/llm-websocket");
        assert_eq!(config.server.port, 8585);
        assert_eq!(config.gateway.token, None);
    }

    #[test]
    fn full_config_parses() {
        let config: Config = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000
            path_prefix = "/voice"

            [bridge]
            enabled = false
            greeting = "Hello there."
            allowlist = ["+15551234567", "5559876543"]
            response_timeout_ms = 15000
            model = "anthropic/claude-sonnet"

            [gateway]
            url = "wss://gateway.example"
            token = "secret"
            "#,
        )
        .unwrap();

        assert!(!config.bridge.enabled);
        assert_eq!(config.bridge.allowlist.len(), 2);
        assert_eq!(config.bridge.response_timeout_ms, 15_000);
        assert_eq!(
            config.bridge.model.as_deref(),
            Some("anthropic/claude-sonnet")
        );
        assert_eq!(config.server.path_prefix, "/voice");
        assert_eq!(config.gateway.token.as_deref(), Some("secret"));
    }

    #[test]
    fn missing_gateway_section_is_an_error() {
        assert!(toml::from_str::<Config>("[bridge]\n").is_err());
    }
}
