use serde::{Deserialize, Serialize};
use std::fmt;

/// Credentials and endpoints for the form login flow
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoginConfig {
    pub base_url: String,
    pub email: String,
    pub password: String,
    pub login_path: String,
    pub session_path: String,
    /// Name of the cookie that carries the authenticated session
    pub session_cookie: String,
    /// Known-good page fetched with the new session; skipped when absent
    pub verify_url: Option<String>,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.strava.com".to_string(),
            email: String::new(),
            password: String::new(),
            login_path: "/login".to_string(),
            session_path: "/session".to_string(),
            session_cookie: "_strava4_session".to_string(),
            verify_url: Some("https://www.strava.com/maps/global-heatmap".to_string()),
        }
    }
}

// Password never reaches the logs
impl fmt::Debug for LoginConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginConfig")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("login_path", &self.login_path)
            .field("session_path", &self.session_path)
            .field("session_cookie", &self.session_cookie)
            .field("verify_url", &self.verify_url)
            .finish()
    }
}

impl LoginConfig {
    /// Validate login configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let base: hyper::Uri = self
            .base_url
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid login base_url '{}': {}", self.base_url, e))?;
        if base.authority().is_none() {
            return Err(anyhow::anyhow!("Login base_url must be absolute"));
        }

        if !self.login_path.starts_with('/') || !self.session_path.starts_with('/') {
            return Err(anyhow::anyhow!(
                "Login login_path and session_path must start with '/'"
            ));
        }

        if self.session_cookie.is_empty() {
            return Err(anyhow::anyhow!("Login session_cookie must not be empty"));
        }

        if let Some(verify) = &self.verify_url {
            verify
                .parse::<hyper::Uri>()
                .map_err(|e| anyhow::anyhow!("Invalid login verify_url '{}': {}", verify, e))?;
        }

        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        !self.email.is_empty() && !self.password.is_empty()
    }

    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.login_path)
    }

    pub fn session_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.session_path)
    }
}
