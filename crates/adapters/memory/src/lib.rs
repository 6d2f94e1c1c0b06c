//! adapter-memory - 内存事务存储
//!
//! 以 JSON 文档集合模拟支持多文档事务的存储：
//! - 会话内的写入先缓冲，提交时原子地应用
//! - 提交时按文档版本做乐观写冲突检测
//! - [`FaultPlan`] 可按调用点注入脚本化的驱动错误

mod fault;
mod repositories;
mod session;
mod store;

pub use fault::*;
pub use repositories::*;
pub use session::*;
pub use store::*;
