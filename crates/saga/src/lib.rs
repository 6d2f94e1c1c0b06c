//! saga - 补偿机制
//!
//! 存储事务无法覆盖的副作用（外部通知、第三方调用）通过注册补偿动作来撤销或缓解；
//! 事务失败时由 [`RollbackService`] 先中止存储事务，再按优先级依次执行补偿。

mod compensation;
mod context;
mod rollback;

pub use compensation::*;
pub use context::*;
pub use rollback::*;
