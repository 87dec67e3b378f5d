//! # 配置管理模块
//!
//! 本模块提供了瓦片代理的完整配置管理功能，包括：
//!
//! - TOML配置文件解析和验证
//! - 环境变量替换和扩展
//! - 纯环境变量启动模式（`SP_PORT`、`SP_EMAIL`、`SP_PASSWORD`等）
//!
//! ## 配置结构
//!
//! - `server`: 监听地址
//! - `upstream`: 上游瓦片服务（来源模板、轮询键、路径前缀）
//! - `session`: 会话缓存（刷新冷却时间、Cookie持久化文件）
//! - `login`: 登录凭据和登录流程端点
//! - `logging`: 日志级别和输出格式
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use tilegate::config::Config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file_with_env("config/config.toml").await?;
//! println!("监听地址: {}", config.server.bind);
//! # Ok(())
//! # }
//! ```

pub mod logging; // 日志配置模块
pub mod login; // 登录流程配置模块
pub mod server; // 监听服务器配置模块
pub mod session; // 会话缓存配置模块
pub mod upstream; // 上游服务配置模块

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub use logging::{LogFormat, LoggingConfig};
pub use login::LoginConfig;
pub use server::ServerConfig;
pub use session::SessionConfig;
pub use upstream::UpstreamConfig;

/// Environment variable names of the environment-only configuration surface
pub const ENV_PORT: &str = "SP_PORT";
pub const ENV_EMAIL: &str = "SP_EMAIL";
pub const ENV_PASSWORD: &str = "SP_PASSWORD";
pub const ENV_REFRESH_COOLDOWN: &str = "SP_REFRESH_COOLDOWN_SECS";
pub const ENV_COOKIE_FILE: &str = "SP_COOKIE_FILE";

/// 瓦片代理主配置结构
///
/// 所有配置段都有默认值，配置文件只需写出需要覆盖的部分。
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// 监听配置
    pub server: ServerConfig,
    /// 上游瓦片服务配置
    pub upstream: UpstreamConfig,
    /// 会话缓存配置
    pub session: SessionConfig,
    /// 登录流程配置
    pub login: LoginConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file with environment variable expansion
    pub async fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file {:?}: {}", path.as_ref(), e)
        })?;

        let config = Self::from_toml_str(&content)?;
        info!("Configuration loaded from {:?}", path.as_ref());
        Ok(config)
    }

    /// Parse configuration from TOML text, expanding `${VAR}` references first
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded_content = expand_env_vars(content);
        let mut config: Config = toml::from_str(&expanded_content)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from process environment only
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(port) = env::var(ENV_PORT) {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", ENV_PORT, port, e))?;
            config.server = ServerConfig::with_port(port);
        }

        if let Ok(email) = env::var(ENV_EMAIL) {
            config.login.email = email;
        }

        if let Ok(password) = env::var(ENV_PASSWORD) {
            config.login.password = password;
        }

        if let Ok(cooldown) = env::var(ENV_REFRESH_COOLDOWN) {
            config.session.refresh_cooldown_secs = cooldown.trim().parse().map_err(|e| {
                anyhow::anyhow!("Invalid {} '{}': {}", ENV_REFRESH_COOLDOWN, cooldown, e)
            })?;
        }

        if let Ok(path) = env::var(ENV_COOKIE_FILE) {
            if !path.is_empty() {
                config.session.cookie_file = Some(PathBuf::from(path));
            }
        }

        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Apply default values where needed
    fn apply_defaults(&mut self) {
        if self.upstream.path_prefix.ends_with('/') {
            let trimmed = self.upstream.path_prefix.trim_end_matches('/').to_string();
            self.upstream.path_prefix = trimmed;
        }

        self.logging.level = self.logging.level.to_ascii_lowercase();
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.upstream.validate()?;
        self.session.validate()?;
        self.login.validate()?;
        self.logging.validate()?;

        if !self.login.has_credentials() {
            warn!(
                "No login credentials configured ({} / {}); session acquisition will fail \
                unless a persisted cookie file is still accepted upstream",
                ENV_EMAIL, ENV_PASSWORD
            );
        }

        Ok(())
    }
}

/// Expand environment variables in configuration content
/// Supports ${VAR} and ${VAR:-default} syntax
fn expand_env_vars(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break; // Malformed ${VAR expression
        };

        result.push_str(&rest[..start]);
        let var_expr = &rest[start + 2..start + len];
        let replacement = match var_expr.split_once(":-") {
            Some((name, default)) => env::var(name).unwrap_or_else(|_| default.to_string()),
            None => env::var(var_expr).unwrap_or_else(|_| {
                warn!(
                    "Environment variable '{}' not found, using empty string",
                    var_expr
                );
                String::new()
            }),
        };
        result.push_str(&replacement);
        rest = &rest[start + len + 1..];
    }

    result.push_str(rest);
    result
}
