//! # Tilegate - 会话管理型瓦片反向代理
//!
//! Tilegate是一个用Rust编写的HTTP反向代理，面向需要Cookie认证的地图瓦片服务。
//! 客户端无需任何凭据即可请求瓦片，代理负责登录、缓存会话并在上游拒绝时刷新。
//!
//! ## 核心功能
//!
//! - **会话管理**: 表单登录获取会话Cookie，失效后后台刷新，带冷却时间
//! - **请求合并**: 同一时刻最多一次会话获取，并发请求共享结果
//! - **连接复用**: 每个上游键一条持久的HTTP/2连接
//! - **轮询分发**: 请求按确定性轮询分布到各上游键
//! - **流式回传**: 图片响应体边接收边转发
//! - **优雅关闭**: Ctrl-C后停止接收新连接并完成在途请求
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use tilegate::{config::Config, proxy::ProxyServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file_with_env("config/config.toml").await?;
//!     let server = ProxyServer::from_config(&config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod balancer;
pub mod config;
pub mod error;
pub mod logger;
pub mod proxy;
pub mod session;

// Re-export commonly used types
pub use balancer::RoundRobinSelector;
pub use error::{ErrorSeverity, TilegateError, TilegateResult};
pub use proxy::{ProxyServer, TileDispatcher, UpstreamPool};
pub use session::{CookieSet, SessionAcquirer, SessionCache};
