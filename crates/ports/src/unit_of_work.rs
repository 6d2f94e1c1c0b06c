//! Unit of Work trait 定义

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use txkit_common::{SessionId, TransactionId};
use txkit_errors::AppResult;

/// Unit of Work 生命周期
///
/// `Idle --begin--> Active --commit--> Committed`，
/// `Active --rollback/dispose--> RolledBack`，终态再 dispose 进入 `Disposed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitOfWorkState {
    Idle,
    Active,
    Committed,
    RolledBack,
    Disposed,
}

impl UnitOfWorkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitOfWorkState::Idle => "idle",
            UnitOfWorkState::Active => "active",
            UnitOfWorkState::Committed => "committed",
            UnitOfWorkState::RolledBack => "rolled_back",
            UnitOfWorkState::Disposed => "disposed",
        }
    }
}

/// Unit of Work trait
#[async_trait]
pub trait UnitOfWork: Send {
    /// 开始事务
    async fn begin(&mut self) -> AppResult<()>;

    /// 提交事务
    async fn commit(&mut self) -> AppResult<()>;

    /// 回滚事务
    ///
    /// 没有活动事务时为空操作。无论中止是否成功都会释放会话；
    /// 返回的错误只说明存储端中止失败。
    async fn rollback(&mut self) -> AppResult<()>;

    /// 兜底清理，可重复调用
    async fn dispose(&mut self);

    fn state(&self) -> UnitOfWorkState;

    fn is_active(&self) -> bool {
        self.state() == UnitOfWorkState::Active
    }

    /// 当前持有的会话
    fn session_id(&self) -> Option<SessionId>;

    /// 最近一次 begin 产生的事务 ID，会话释放后仍保留用于诊断
    fn transaction_id(&self) -> Option<TransactionId>;
}
