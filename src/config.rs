use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_query_timeout_secs() -> u64 {
    300
}

fn default_history_page_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub window: WindowConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Upper bound for one query round-trip; the request is abandoned
    /// (not aborted at the transport level) once this elapses.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_history_page_size")]
    pub history_page_size: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                base_url: default_base_url(),
                query_timeout_secs: default_query_timeout_secs(),
                history_page_size: default_history_page_size(),
            },
            window: WindowConfig {
                width: 1100,
                height: 720,
            },
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => eprintln!("Error parsing config.toml: {}. Using defaults.", e),
                },
                Err(e) => eprintln!("Error reading config.toml: {}. Using defaults.", e),
            }
        } else {
            // Create config directory if it doesn't exist
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
        }

        Config::default()
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/expertdesk")
        } else {
            PathBuf::from(".")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.server.base_url, "http://localhost:8080");
        assert_eq!(config.server.query_timeout_secs, 300);
        assert_eq!(config.server.history_page_size, 100);
    }

    #[test]
    fn partial_server_section_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            base_url = "https://match.example.com"

            [window]
            width = 900
            height = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.server.base_url, "https://match.example.com");
        assert_eq!(config.server.query_timeout_secs, 300);
        assert_eq!(config.window.width, 900);
    }
}
