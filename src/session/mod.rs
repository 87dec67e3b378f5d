//! # 会话管理模块
//!
//! 本模块负责上游认证会话的完整生命周期：
//!
//! - `CookieSet`: 会话凭据（有序、名称唯一的Cookie集合）
//! - `SessionAcquirer`: 获取新会话的能力接口
//! - `FormLoginAcquirer`: 基于HTML表单登录的会话获取实现
//! - `SessionCache`: 缓存当前会话，合并并发获取请求，限制刷新频率
//! - `CookieStore`: 会话Cookie的文件持久化
//!
//! ## 并发模型
//!
//! 读取方通过原子指针交换获得当前会话，永远不会被后台刷新阻塞；
//! 同一时刻最多只有一个获取操作在执行。

pub mod acquirer; // 会话获取接口
pub mod cache; // 会话缓存与刷新调度
pub mod cookie; // Cookie集合数据结构
pub mod login; // 表单登录实现
pub mod store; // Cookie持久化

pub use acquirer::SessionAcquirer;
pub use cache::SessionCache;
pub use cookie::{parse_set_cookie, Cookie, CookieSet};
pub use login::FormLoginAcquirer;
pub use store::CookieStore;
