//! # 日志模块
//!
//! - `init_tracing`: 初始化全局tracing订阅者（文本或JSON输出，`RUST_LOG`优先）
//! - `AccessRecord`: 每次请求分发输出的结构化访问日志，
//!   包含状态码、上游键以及客户端标识信息（x-forwarded-for、referer、user-agent）

pub mod access; // 访问日志记录

pub use access::{AccessRecord, ACCESS_TARGET};

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tilegate={},hyper=warn,rustls=warn", level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };

    installed.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
