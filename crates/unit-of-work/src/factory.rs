//! Unit of Work 工厂与作用域执行

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{error, warn};
use txkit_errors::AppResult;
use txkit_ports::{SessionProvider, UnitOfWork};
use txkit_saga::{DiagnosticFields, RollbackService};

use crate::{SessionUnitOfWork, TransactionOptions};

/// Unit of Work 工厂
pub struct UnitOfWorkFactory<S: SessionProvider> {
    store: Arc<S>,
    defaults: TransactionOptions,
}

impl<S: SessionProvider> Clone for UnitOfWorkFactory<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            defaults: self.defaults.clone(),
        }
    }
}

impl<S: SessionProvider> UnitOfWorkFactory<S> {
    pub fn new(store: Arc<S>, defaults: TransactionOptions) -> Self {
        Self { store, defaults }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn defaults(&self) -> &TransactionOptions {
        &self.defaults
    }

    /// 创建 Unit of Work，未指定选项时使用工厂默认值
    pub fn create(&self, options: Option<TransactionOptions>) -> SessionUnitOfWork<S> {
        SessionUnitOfWork::new(
            Arc::clone(&self.store),
            options.unwrap_or_else(|| self.defaults.clone()),
        )
    }

    /// 在事务中执行回调
    ///
    /// 回调返回 `Ok` 时提交，返回 `Err` 时回滚，最后总是释放 Unit of Work。
    pub async fn run_in_transaction<T, F>(
        &self,
        options: Option<TransactionOptions>,
        operation: F,
    ) -> AppResult<T>
    where
        T: Send,
        F: for<'u> FnOnce(&'u mut SessionUnitOfWork<S>) -> BoxFuture<'u, AppResult<T>> + Send,
    {
        let mut uow = self.create(options);
        uow.begin().await?;

        let result = match operation(&mut uow).await {
            Ok(value) => uow.commit().await.map(|()| value),
            Err(e) => {
                if let Err(rollback_error) = uow.rollback().await {
                    warn!(error = %rollback_error, "Rollback after failed operation reported an error");
                }
                Err(e)
            }
        };

        uow.dispose().await;
        result
    }

    /// 在事务中执行回调，失败时交给回滚服务执行补偿
    ///
    /// 回调可以通过 `uow.transaction_id()` 注册补偿动作。成功时清除该事务的补偿注册；
    /// 失败（包括提交失败）时执行完整回滚，返回原始错误。
    pub async fn run_with_rollback<T, F>(
        &self,
        options: Option<TransactionOptions>,
        operation_name: &str,
        rollback_service: &RollbackService,
        diagnostics: DiagnosticFields,
        operation: F,
    ) -> AppResult<T>
    where
        T: Send,
        F: for<'u> FnOnce(&'u mut SessionUnitOfWork<S>) -> BoxFuture<'u, AppResult<T>> + Send,
    {
        let mut uow = self.create(options);
        uow.begin().await?;

        let outcome = match operation(&mut uow).await {
            Ok(value) => uow.commit().await.map(|()| value),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(value) => {
                if let Some(transaction_id) = uow.transaction_id() {
                    rollback_service.clear_transaction(&transaction_id);
                }
                uow.dispose().await;
                Ok(value)
            }
            Err(e) => {
                let context = rollback_service.create_rollback_context(
                    &uow,
                    operation_name,
                    e.clone(),
                    diagnostics,
                );
                let rollback = rollback_service.perform_rollback(&mut uow, &context).await;
                if !rollback.success {
                    error!(
                        operation = operation_name,
                        failed = ?rollback.compensations_failed,
                        "Automatic rollback completed with errors"
                    );
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use txkit_adapter_memory::{COUNTERS, CounterRepository, MemoryStore, RECORDS, Record, RecordRepository};
    use txkit_errors::AppError;
    use txkit_ports::ReadConcern;
    use txkit_saga::CompensationAction;

    fn factory() -> (Arc<MemoryStore>, UnitOfWorkFactory<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let factory = UnitOfWorkFactory::new(Arc::clone(&store), TransactionOptions::default());
        (store, factory)
    }

    #[test]
    fn test_create_uses_defaults_or_overrides() {
        let (_store, factory) = factory();
        assert_eq!(factory.create(None).options().max_retries, 3);

        let custom = factory.create(Some(TransactionOptions::new().with_max_retries(0)));
        assert_eq!(custom.options().max_retries, 0);
    }

    #[tokio::test]
    async fn test_run_in_transaction_commits() {
        let (store, factory) = factory();

        let value = factory
            .run_in_transaction(None, |uow| {
                Box::pin(async move {
                    let counters = uow.get_repository::<CounterRepository>()?;
                    let records = uow.get_repository::<RecordRepository>()?;
                    records.insert(&Record::new("job-1", "job", json!({})))?;
                    counters.increment("jobs", 1)
                })
            })
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(store.document(COUNTERS, "jobs"), Some(json!({ "value": 1 })));
        assert_eq!(store.document_count(RECORDS), 1);
        assert_eq!(store.stats().sessions_ended, 1);
    }

    #[tokio::test]
    async fn test_run_in_transaction_rolls_back_on_error() {
        let (store, factory) = factory();

        let result: AppResult<()> = factory
            .run_in_transaction(None, |uow| {
                Box::pin(async move {
                    uow.get_repository::<CounterRepository>()?
                        .increment("jobs", 1)?;
                    Err(AppError::domain("staff member not found"))
                })
            })
            .await;

        assert!(matches!(result, Err(AppError::Domain(_))));
        assert_eq!(store.document(COUNTERS, "jobs"), None);
        assert_eq!(store.stats().aborts, 1);
        assert_eq!(store.active_transactions(), 0);
    }

    #[tokio::test]
    async fn test_run_with_rollback_runs_compensations() {
        let (store, factory) = factory();
        let service = Arc::new(RollbackService::default());
        let undone = Arc::new(AtomicU32::new(0));

        let result: AppResult<()> = factory
            .run_with_rollback(
                None,
                "create_case",
                &service,
                DiagnosticFields::new().with_guild_id("g-1"),
                |uow| {
                    let service = Arc::clone(&service);
                    let undone = Arc::clone(&undone);
                    Box::pin(async move {
                        let tx = uow
                            .transaction_id()
                            .ok_or_else(|| AppError::internal("missing transaction id"))?;
                        service.register_compensation_action(
                            &tx,
                            CompensationAction::new("delete-channel", "delete case channel", move || {
                                let undone = Arc::clone(&undone);
                                async move {
                                    undone.fetch_add(1, Ordering::SeqCst);
                                    Ok(())
                                }
                            }),
                        );
                        uow.get_repository::<RecordRepository>()?
                            .insert(&Record::new("case-1", "case", json!({})))?;
                        Err(AppError::domain("client is blacklisted"))
                    })
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::Domain(_))));
        assert_eq!(undone.load(Ordering::SeqCst), 1);
        assert_eq!(store.document_count(RECORDS), 0);
        assert_eq!(service.history_len(), 1);
    }

    #[tokio::test]
    async fn test_run_with_rollback_clears_registry_on_success() {
        let (_store, factory) = factory();
        let service = Arc::new(RollbackService::default());

        let tx = factory
            .run_with_rollback(None, "create_case", &service, DiagnosticFields::new(), |uow| {
                let service = Arc::clone(&service);
                Box::pin(async move {
                    let tx = uow
                        .transaction_id()
                        .ok_or_else(|| AppError::internal("missing transaction id"))?;
                    service.register_compensation_action(
                        &tx,
                        CompensationAction::new("noop", "noop", || async { Ok(()) }),
                    );
                    Ok(tx)
                })
            })
            .await
            .unwrap();

        assert_eq!(service.compensation_count(&tx), 0);
        assert!(service.get_rollback_history(&tx).is_none());
    }

    #[tokio::test]
    async fn test_run_with_rollback_honours_options() {
        let (store, factory) = factory();
        let service = Arc::new(RollbackService::default());
        let options = TransactionOptions::new().with_read_concern(ReadConcern::Snapshot);

        let read_concern = factory
            .run_with_rollback(Some(options), "read_case", &service, DiagnosticFields::new(), |uow| {
                let store = Arc::clone(&store);
                Box::pin(async move {
                    let session_id = uow
                        .session_id()
                        .ok_or_else(|| AppError::internal("missing session"))?;
                    store
                        .transaction_settings(session_id)
                        .map(|settings| settings.read_concern)
                        .ok_or_else(|| AppError::internal("missing transaction settings"))
                })
            })
            .await
            .unwrap();

        assert_eq!(read_concern, ReadConcern::Snapshot);
    }
}
