//! # 负载均衡模块
//!
//! 上游键的确定性轮询选择。每次分发请求时游标前进一位，
//! 到达末尾后回绕，键集合在启动时确定且不再变化。

pub mod round_robin; // 轮询选择器

pub use round_robin::RoundRobinSelector;
