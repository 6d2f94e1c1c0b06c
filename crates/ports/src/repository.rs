//! Repository trait 定义
//!
//! 想参与事务的仓储必须实现 [`SessionAware`]，并在 [`Repository::session_capability`]
//! 中声明出来；Unit of Work 只会把会话注入声明了该能力的仓储。

use std::sync::{Arc, RwLock};

use crate::SessionHandle;
use txkit_common::SessionId;

/// 仓储的事务能力
pub trait SessionAware: Send + Sync {
    /// 注入或清除（`None`）当前事务会话
    fn set_session(&self, session: Option<SessionHandle>);

    fn session(&self) -> Option<SessionHandle>;
}

/// 由 Unit of Work 创建和缓存的仓储
pub trait Repository<S: ?Sized>: Send + Sync + 'static {
    fn create(store: &Arc<S>) -> Self
    where
        Self: Sized;

    /// 声明事务能力；返回 None 的仓储仍可使用，但不具备事务隔离
    fn session_capability(&self) -> Option<&dyn SessionAware> {
        None
    }
}

/// 会话槽位，仓储内嵌它即可实现 [`SessionAware`]
#[derive(Debug, Default)]
pub struct SessionSlot {
    session: RwLock<Option<SessionHandle>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, session: Option<SessionHandle>) {
        let mut slot = self.session.write().unwrap_or_else(|e| e.into_inner());
        *slot = session;
    }

    pub fn get(&self) -> Option<SessionHandle> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.get().map(|s| s.id())
    }

    pub fn is_bound(&self) -> bool {
        self.session_id().is_some()
    }
}

impl SessionAware for SessionSlot {
    fn set_session(&self, session: Option<SessionHandle>) {
        self.set(session);
    }

    fn session(&self) -> Option<SessionHandle> {
        self.get()
    }
}
