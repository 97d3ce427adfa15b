use std::fs;
use std::path::Path;

use anyhow::Context;
use replicast_receiver::ReceiverConfig;
use replicast_server::ServerConfig;
use serde::{Deserialize, Serialize};

/// Node configuration file: `[receiver]` and `[server]` tables.
///
/// ```toml
/// [receiver]
/// multicast_group = "239.255.0.1"
/// multicast_port = 3342
///
/// [receiver.recovery]
/// base_url = "http://origin:8080/"
///
/// [server]
/// bind_addr = "0.0.0.0:8080"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub receiver: ReceiverConfig,
    pub server: ServerConfig,
}

impl Settings {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let settings: Self = toml::from_str(s).context("invalid configuration")?;
        settings.receiver.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("loading {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let s = Settings::from_toml_str("").unwrap();
        assert_eq!(s, Settings::default());
        assert!(!s.receiver.any_listener());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[receiver]
multicast_group = "239.255.0.1"
unicast_bind = "127.0.0.1:4000"

[receiver.recovery]
base_url = "http://origin:8080/"
grace_ms = 2000

[server]
bind_addr = "0.0.0.0:9090"
"#
        )
        .unwrap();

        let s = Settings::load(file.path()).unwrap();
        assert_eq!(s.receiver.multicast_port, 3342);
        assert!(s.receiver.any_listener());
        assert_eq!(s.receiver.recovery.grace_ms, 2000);
        assert_eq!(s.server.bind_addr.port(), 9090);
    }

    #[test]
    fn invalid_group_is_rejected() {
        let err = Settings::from_toml_str("[receiver]\nmulticast_group = \"10.0.0.1\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = Settings::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("absent.toml"));
    }
}
