//! 基于存储会话的 Unit of Work 实现

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use txkit_common::{SessionId, TransactionId, with_conditional_retry};
use txkit_errors::{
    AppError, AppResult, StoreError, TRANSIENT_TRANSACTION_ERROR,
    UNKNOWN_TRANSACTION_COMMIT_RESULT, codes,
};
use txkit_ports::{Repository, SessionHandle, SessionProvider, UnitOfWork, UnitOfWorkState};
use txkit_telemetry::metrics;

use crate::TransactionOptions;

/// 提交失败后是否值得原样重试
pub fn is_commit_retryable(error: &StoreError) -> bool {
    error.has_label(TRANSIENT_TRANSACTION_ERROR)
        || error.has_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
        || error.code == Some(codes::WRITE_CONFLICT)
}

struct RepositoryEntry<S: SessionProvider> {
    instance: Arc<dyn Any + Send + Sync>,
    repository: Arc<dyn Repository<S>>,
}

impl<S: SessionProvider> RepositoryEntry<S> {
    fn new<R: Repository<S>>(repository: Arc<R>) -> Self {
        Self {
            instance: repository.clone(),
            repository,
        }
    }

    fn inject(&self, session: Option<SessionHandle>) {
        if let Some(capability) = self.repository.session_capability() {
            capability.set_session(session);
        }
    }
}

/// 独占一个存储会话的 Unit of Work
///
/// 不能在并发执行的逻辑操作之间共享。
pub struct SessionUnitOfWork<S: SessionProvider> {
    store: Arc<S>,
    options: TransactionOptions,
    session: Option<SessionHandle>,
    transaction_id: Option<TransactionId>,
    repositories: HashMap<TypeId, RepositoryEntry<S>>,
    state: UnitOfWorkState,
}

impl<S: SessionProvider> SessionUnitOfWork<S> {
    pub fn new(store: Arc<S>, options: TransactionOptions) -> Self {
        Self {
            store,
            options,
            session: None,
            transaction_id: None,
            repositories: HashMap::new(),
            state: UnitOfWorkState::Idle,
        }
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// 当前会话
    pub fn session(&self) -> Option<SessionHandle> {
        self.session.clone()
    }

    /// 获取仓储
    ///
    /// 同一个 Unit of Work 内按类型缓存；首次获取时创建并注入当前会话。
    pub fn get_repository<R: Repository<S>>(&mut self) -> AppResult<Arc<R>> {
        let Some(session) = self.session.clone() else {
            return Err(AppError::not_active(
                "get_repository requires an active transaction, call begin() first",
            ));
        };

        let type_id = TypeId::of::<R>();
        if let Some(entry) = self.repositories.get(&type_id) {
            return entry
                .instance
                .clone()
                .downcast::<R>()
                .map_err(|_| AppError::internal("repository cache type mismatch"));
        }

        let repository = Arc::new(R::create(&self.store));
        let entry = RepositoryEntry::new(Arc::clone(&repository));
        entry.inject(Some(session));
        self.repositories.insert(type_id, entry);
        debug!(
            repository = std::any::type_name::<R>(),
            transactional = repository.session_capability().is_some(),
            "Repository created"
        );
        Ok(repository)
    }

    /// 注册外部创建的仓储；事务已开启时立即注入会话，否则在 begin 时注入
    pub fn register_repository<R: Repository<S>>(&mut self, repository: R) -> Arc<R> {
        let repository = Arc::new(repository);
        let entry = RepositoryEntry::new(Arc::clone(&repository));
        if self.state == UnitOfWorkState::Active {
            entry.inject(self.session.clone());
        }
        if let Some(previous) = self.repositories.insert(TypeId::of::<R>(), entry) {
            previous.inject(None);
        }
        repository
    }

    fn inject_session(&self, session: Option<SessionHandle>) {
        for entry in self.repositories.values() {
            entry.inject(session.clone());
        }
    }

    /// 先解除所有仓储的会话，再结束会话
    async fn release_session(&mut self) {
        self.inject_session(None);
        if let Some(session) = self.session.take() {
            session.lock().await.end_session().await;
            debug!(session_id = %session.id(), "Session ended");
        }
    }

    async fn abort_quietly(session: &SessionHandle) -> Result<(), StoreError> {
        let result = session.lock().await.abort_transaction().await;
        if let Err(e) = &result {
            warn!(
                session_id = %session.id(),
                error = %e,
                "Failed to abort transaction"
            );
        }
        result
    }
}

#[async_trait]
impl<S: SessionProvider> UnitOfWork for SessionUnitOfWork<S> {
    async fn begin(&mut self) -> AppResult<()> {
        match self.state {
            UnitOfWorkState::Active => {
                return Err(AppError::invalid_state("transaction already active"));
            }
            UnitOfWorkState::Disposed => {
                return Err(AppError::invalid_state("unit of work already disposed"));
            }
            _ => {}
        }

        let session = match self.store.start_session().await {
            Ok(session) => SessionHandle::new(session),
            Err(e) => {
                error!(error = %e, "Failed to start session");
                return Err(e.into());
            }
        };
        self.session = Some(session.clone());

        let settings = self.options.settings();
        let started = session.lock().await.start_transaction(&settings).await;
        if let Err(e) = started {
            error!(session_id = %session.id(), error = %e, "Failed to start transaction");
            self.release_session().await;
            return Err(e.into());
        }

        let transaction_id = TransactionId::from(session.id());
        self.transaction_id = Some(transaction_id.clone());
        self.state = UnitOfWorkState::Active;
        self.inject_session(Some(session));

        debug!(
            transaction_id = %transaction_id,
            read_concern = settings.read_concern.as_str(),
            max_commit_time_ms = settings.max_commit_time.as_millis() as u64,
            repositories = self.repositories.len(),
            "Transaction started"
        );
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        let session = match (&self.session, self.state) {
            (Some(session), UnitOfWorkState::Active) => session.clone(),
            _ => return Err(AppError::not_active("commit requires an active transaction")),
        };
        let transaction_id = self
            .transaction_id
            .clone()
            .unwrap_or_else(|| TransactionId::from(session.id()));

        let retry = self.options.commit_retry();
        let operation = format!("commit:{}", transaction_id);
        let mut attempts = 0u32;

        let outcome = with_conditional_retry(
            &retry,
            &operation,
            || {
                attempts += 1;
                if attempts > 1 {
                    metrics::record_commit_retry();
                }
                let session = session.clone();
                async move {
                    let result = session.lock().await.commit_transaction().await;
                    result
                }
            },
            is_commit_retryable,
        )
        .await;

        match outcome {
            Ok(()) => {
                self.state = UnitOfWorkState::Committed;
                self.release_session().await;
                metrics::record_commit(true);
                info!(transaction_id = %transaction_id, attempts, "Transaction committed");
                Ok(())
            }
            Err(source) => {
                error!(
                    transaction_id = %transaction_id,
                    attempts,
                    error = %source,
                    "Transaction commit failed"
                );
                let _ = Self::abort_quietly(&session).await;
                self.state = UnitOfWorkState::RolledBack;
                self.release_session().await;
                metrics::record_commit(false);
                Err(AppError::CommitFailed {
                    transaction_id: transaction_id.to_string(),
                    attempts,
                    source,
                })
            }
        }
    }

    async fn rollback(&mut self) -> AppResult<()> {
        let session = match (&self.session, self.state) {
            (Some(session), UnitOfWorkState::Active) => session.clone(),
            _ => {
                debug!(state = self.state.as_str(), "No active transaction to roll back");
                return Ok(());
            }
        };

        let aborted = Self::abort_quietly(&session).await;
        self.state = UnitOfWorkState::RolledBack;
        self.release_session().await;

        match aborted {
            Ok(()) => {
                info!(transaction_id = ?self.transaction_id, "Transaction rolled back");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn dispose(&mut self) {
        if self.state == UnitOfWorkState::Disposed {
            return;
        }
        if self.state == UnitOfWorkState::Active {
            let _ = self.rollback().await;
        }
        self.release_session().await;
        self.state = UnitOfWorkState::Disposed;
    }

    fn state(&self) -> UnitOfWorkState {
        self.state
    }

    fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(SessionHandle::id)
    }

    fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id.clone()
    }
}

impl<S: SessionProvider> fmt::Debug for SessionUnitOfWork<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionUnitOfWork")
            .field("state", &self.state)
            .field("transaction_id", &self.transaction_id)
            .field("session", &self.session)
            .field("repositories", &self.repositories.len())
            .finish()
    }
}

impl<S: SessionProvider> Drop for SessionUnitOfWork<S> {
    fn drop(&mut self) {
        if self.state == UnitOfWorkState::Active {
            warn!(
                transaction_id = ?self.transaction_id,
                "Unit of work dropped with an active transaction"
            );
        }
    }
}
