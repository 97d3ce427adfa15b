use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Authoritative upstream, e.g. `http://master:8080/`. Recovery is
    /// disabled when unset.
    pub base_url: Option<String>,
    /// Quiet time after the last touch before a blob is recovered.
    pub grace_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl RecoveryConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn enabled(&self) -> bool {
        self.base_url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            grace_ms: 10_000,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 5_000,
        }
    }
}
