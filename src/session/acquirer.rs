use async_trait::async_trait;

use super::cookie::CookieSet;
use crate::error::TilegateResult;

/// Capability that produces a fresh, immediately usable cookie set.
///
/// Failures are reported as [`crate::error::TilegateError::Auth`]. How the
/// session is obtained (form login, external browser, static file) is up to
/// the implementation.
#[async_trait]
pub trait SessionAcquirer: Send + Sync {
    async fn acquire_session(&self) -> TilegateResult<CookieSet>;

    /// Name used in log lines
    fn name(&self) -> &str {
        "session-acquirer"
    }
}
