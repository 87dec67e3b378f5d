use std::time::Duration;
use tracing::info;

use crate::proxy::headers::ClientMeta;

/// Log target of the per-dispatch access line
pub const ACCESS_TARGET: &str = "tilegate::access";

/// One dispatched tile request, emitted as a single structured log line
#[derive(Debug, Clone)]
pub struct AccessRecord<'a> {
    pub status: u16,
    pub upstream_status: Option<u16>,
    pub key: &'a str,
    pub meta: &'a ClientMeta,
    pub elapsed: Duration,
}

impl AccessRecord<'_> {
    pub fn emit(&self) {
        info!(
            target: ACCESS_TARGET,
            status = self.status,
            upstream_status = self.upstream_status,
            key = self.key,
            forwarded_for = self.meta.forwarded_for.as_deref().unwrap_or("-"),
            referer = self.meta.referer.as_deref().unwrap_or("-"),
            user_agent = self.meta.user_agent.as_deref().unwrap_or("-"),
            remote_addr = self.meta.remote_addr.map(|a| a.to_string()).as_deref().unwrap_or("-"),
            elapsed_ms = self.elapsed.as_millis() as u64,
            "{}",
            self.summary()
        );
    }

    /// Human-readable `status | forwarded-for | referer | user-agent` line
    pub fn summary(&self) -> String {
        format!(
            "{} | {} | {} | {}",
            self.upstream_status.unwrap_or(self.status),
            self.meta.forwarded_for.as_deref().unwrap_or("-"),
            self.meta.referer.as_deref().unwrap_or("-"),
            self.meta.user_agent.as_deref().unwrap_or("-"),
        )
    }
}
