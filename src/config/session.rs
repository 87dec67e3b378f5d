use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Session cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum spacing between refreshes triggered by upstream rejections (seconds)
    pub refresh_cooldown_secs: u64,
    /// Where the last acquired cookie set is persisted
    pub cookie_file: Option<PathBuf>,
    /// Start the first acquisition at startup rather than on the first request
    pub warm_up: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_cooldown_secs: 240, // 4 minutes
            cookie_file: None,
            warm_up: true,
        }
    }
}

impl SessionConfig {
    /// Validate session configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.refresh_cooldown_secs == 0 {
            return Err(anyhow::anyhow!(
                "Session refresh_cooldown_secs must be greater than 0"
            ));
        }

        if let Some(path) = &self.cookie_file {
            if path.as_os_str().is_empty() {
                return Err(anyhow::anyhow!("Session cookie_file must not be empty"));
            }
        }

        Ok(())
    }

    pub fn refresh_cooldown(&self) -> Duration {
        Duration::from_secs(self.refresh_cooldown_secs)
    }
}
