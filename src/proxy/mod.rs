//! # 代理服务器模块
//!
//! 本模块实现了瓦片代理的HTTP转发路径，包括：
//!
//! - 客户端连接监听与优雅关闭
//! - 轮询选择上游键并附加当前会话Cookie
//! - 每个上游键一条持久的HTTP/2多路复用连接
//! - 图片响应体的流式回传
//!
//! ## 主要组件
//!
//! - `ProxyServer`: 监听器，将每个请求交给分发器
//! - `TileDispatcher`: 请求分发与上游响应分类
//! - `UpstreamPool`: 按键管理的HTTP/2连接池
//! - `ClientMeta`: 访问日志所需的客户端标识信息
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use tilegate::config::Config;
//! use tilegate::proxy::ProxyServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file_with_env("config/config.toml").await?;
//! let server = ProxyServer::from_config(&config).await?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatcher; // 请求分发器
pub mod headers; // 请求/响应头辅助函数
pub mod pool; // 上游HTTP/2连接池
pub mod server; // 监听服务器实现

pub use dispatcher::TileDispatcher;
pub use headers::ClientMeta;
pub use pool::UpstreamPool;
pub use server::ProxyServer;
