//! unit-of-work - 基于存储会话的 Unit of Work
//!
//! 一个 [`SessionUnitOfWork`] 独占一个存储会话，负责开启/提交/回滚事务，
//! 并把会话注入到声明了事务能力的仓储中。
//! [`UnitOfWorkFactory`] 负责创建实例，并提供作用域执行辅助函数。

mod factory;
mod options;
mod session_uow;

pub use factory::*;
pub use options::*;
pub use session_uow::*;
