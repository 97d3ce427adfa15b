use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Largest accepted upload body.
    pub max_upload_size: usize,
    /// Answer cross-origin requests from any origin.
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_upload_size: 100 * 1024 * 1024,
            permissive_cors: false,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(s: &str) -> ServerResult<Self> {
        toml::from_str(s).map_err(|e| ServerError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ServerConfig::default();
        assert_eq!(c.bind_addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(c.max_upload_size, 100 * 1024 * 1024);
        assert!(!c.permissive_cors);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = ServerConfig::from_toml_str(r#"bind_addr = "0.0.0.0:9000""#).unwrap();
        assert_eq!(c.bind_addr.port(), 9000);
        assert_eq!(c.max_upload_size, ServerConfig::default().max_upload_size);
        assert!(ServerConfig::from_toml_str("bind_addr = 5").is_err());
    }
}
