//! 存储事务契约
//!
//! 底层存储需要原生支持多文档事务：创建会话、开始/提交/中止事务、结束会话，
//! 并通过错误码和错误标签区分瞬时错误与永久错误。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use txkit_common::SessionId;
use txkit_errors::StoreError;

/// 读关注级别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadConcern {
    Local,
    Available,
    #[default]
    Majority,
    Linearizable,
    Snapshot,
}

impl ReadConcern {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadConcern::Local => "local",
            ReadConcern::Available => "available",
            ReadConcern::Majority => "majority",
            ReadConcern::Linearizable => "linearizable",
            ReadConcern::Snapshot => "snapshot",
        }
    }
}

/// 写确认方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acknowledgement {
    #[default]
    Majority,
    Nodes(u32),
}

/// 写关注级别
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConcern {
    pub w: Acknowledgement,
    /// 是否等待写入日志
    pub journal: bool,
    pub timeout: Option<Duration>,
}

impl WriteConcern {
    pub fn majority() -> Self {
        Self::default()
    }

    pub fn nodes(n: u32) -> Self {
        Self {
            w: Acknowledgement::Nodes(n),
            journal: true,
            timeout: None,
        }
    }
}

impl Default for WriteConcern {
    fn default() -> Self {
        Self {
            w: Acknowledgement::Majority,
            journal: true,
            timeout: None,
        }
    }
}

/// 开启事务时下发给存储的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSettings {
    pub read_concern: ReadConcern,
    pub write_concern: WriteConcern,
    /// 服务端事务最长执行时间
    pub max_commit_time: Duration,
}

/// 存储会话
///
/// 会话不是并发安全的，同一时间只能被一个逻辑操作持有。
#[async_trait]
pub trait StoreSession: Send + Sync {
    fn id(&self) -> SessionId;

    fn in_transaction(&self) -> bool;

    async fn start_transaction(&mut self, settings: &TransactionSettings) -> Result<(), StoreError>;

    async fn commit_transaction(&mut self) -> Result<(), StoreError>;

    async fn abort_transaction(&mut self) -> Result<(), StoreError>;

    async fn end_session(&mut self);
}

/// 会话工厂（存储客户端）
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    async fn start_session(&self) -> Result<Box<dyn StoreSession>, StoreError>;
}

/// 可在 Unit of Work 与仓储之间共享的会话句柄
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    inner: Arc<Mutex<Box<dyn StoreSession>>>,
}

impl SessionHandle {
    pub fn new(session: Box<dyn StoreSession>) -> Self {
        Self {
            id: session.id(),
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn StoreSession>> {
        self.inner.lock().await
    }

    /// 两个句柄是否指向同一个会话
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}
