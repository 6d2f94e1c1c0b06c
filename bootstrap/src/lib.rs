//! txkit-bootstrap - 事务层装配
//!
//! 从配置构建 Unit of Work 工厂、回滚服务和事务错误处理器

mod runtime;

pub use runtime::*;
