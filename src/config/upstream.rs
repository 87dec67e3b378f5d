use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder substituted with the round-robin key in `origin_template`
pub const KEY_PLACEHOLDER: &str = "{key}";

/// Upstream tile service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Origin for one upstream key, e.g. `https://content-{key}.example.com`
    pub origin_template: String,
    /// Round-robin keys; one persistent connection is kept per key
    pub keys: Vec<String>,
    /// Fixed prefix prepended to the inbound path and query
    pub path_prefix: String,
    /// Optional per-request timeout (seconds); transport defaults apply when absent
    pub request_timeout_secs: Option<u64>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            origin_template: "https://content-{key}.strava.com".to_string(),
            keys: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            path_prefix: "/identified/globalheat".to_string(),
            request_timeout_secs: None,
        }
    }
}

impl UpstreamConfig {
    /// Validate upstream configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.keys.is_empty() {
            return Err(anyhow::anyhow!("Upstream keys must not be empty"));
        }

        if self.keys.iter().any(|k| k.trim().is_empty()) {
            return Err(anyhow::anyhow!("Upstream keys must not be blank"));
        }

        let mut seen = std::collections::HashSet::new();
        for key in &self.keys {
            if !seen.insert(key.as_str()) {
                return Err(anyhow::anyhow!("Duplicate upstream key '{}'", key));
            }
        }

        if !self.origin_template.contains(KEY_PLACEHOLDER) && self.keys.len() > 1 {
            return Err(anyhow::anyhow!(
                "Upstream origin_template must contain {} when more than one key is configured",
                KEY_PLACEHOLDER
            ));
        }

        for key in &self.keys {
            let origin = self.origin_for(key);
            let uri: hyper::Uri = origin
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid upstream origin '{}': {}", origin, e))?;
            match uri.scheme_str() {
                Some("http") | Some("https") => {}
                _ => {
                    return Err(anyhow::anyhow!(
                        "Upstream origin '{}' must use http or https",
                        origin
                    ))
                }
            }
            if uri.authority().is_none() {
                return Err(anyhow::anyhow!(
                    "Upstream origin '{}' is missing a host",
                    origin
                ));
            }
        }

        if !self.path_prefix.is_empty() && !self.path_prefix.starts_with('/') {
            return Err(anyhow::anyhow!("Upstream path_prefix must start with '/'"));
        }

        if let Some(0) = self.request_timeout_secs {
            return Err(anyhow::anyhow!(
                "Upstream request_timeout_secs must be greater than 0"
            ));
        }

        Ok(())
    }

    /// Origin (scheme + authority) for a key
    pub fn origin_for(&self, key: &str) -> String {
        self.origin_template.replace(KEY_PLACEHOLDER, key)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
