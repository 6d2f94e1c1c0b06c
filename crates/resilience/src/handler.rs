//! 事务错误处理器
//!
//! 组合错误分类、断路器和回滚服务：
//! - [`TransactionErrorHandler::execute_with_retry`] 按分类结果做指数退避重试
//! - [`TransactionErrorHandler::handle_transaction_error`] 分类后交给回滚服务执行回滚

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, warn};
use txkit_common::{add_jitter, exponential_backoff};
use txkit_errors::{AppError, AppResult};
use txkit_ports::UnitOfWork;
use txkit_saga::{DiagnosticFields, RollbackResult, RollbackService};
use txkit_telemetry::metrics;

use crate::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, TransactionErrorInfo, classify_error,
};

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 首次之后最多重试次数
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 单次尝试超时
    pub attempt_timeout: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// 一次 `execute_with_retry` 的结果
#[derive(Debug)]
pub struct TransactionAttemptResult<T> {
    pub outcome: AppResult<T>,
    /// 实际执行次数，被断路器拒绝时为 0
    pub attempts: u32,
    pub duration: Duration,
    pub was_retried: bool,
}

impl<T> TransactionAttemptResult<T> {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&AppError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> AppResult<T> {
        self.outcome
    }
}

/// `handle_transaction_error` 的返回
#[derive(Debug, Clone)]
pub struct TransactionErrorReport {
    pub error_info: TransactionErrorInfo,
    pub rollback: RollbackResult,
    /// 仅供日志和运维参考
    pub recovery_actions: Vec<String>,
}

#[derive(Debug)]
pub struct TransactionErrorHandler {
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    rollback_service: Arc<RollbackService>,
}

impl TransactionErrorHandler {
    pub fn new(
        policy: RetryPolicy,
        breaker_config: CircuitBreakerConfig,
        rollback_service: Arc<RollbackService>,
    ) -> Self {
        Self::with_breaker(policy, CircuitBreaker::new(breaker_config), rollback_service)
    }

    /// 使用外部构造的断路器（例如注入了手动时钟）
    pub fn with_breaker(
        policy: RetryPolicy,
        breaker: CircuitBreaker,
        rollback_service: Arc<RollbackService>,
    ) -> Self {
        Self {
            policy,
            breaker,
            rollback_service,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn rollback_service(&self) -> &Arc<RollbackService> {
        &self.rollback_service
    }

    pub fn classify_error(&self, error: &AppError) -> TransactionErrorInfo {
        classify_error(error)
    }

    /// 带分类重试地执行操作
    ///
    /// 每次尝试都受 `attempt_timeout` 约束，超时按普通失败分类。
    /// 一次调用最终失败时只记录一次断路器失败，成功则立即重置断路器。
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        mut operation: F,
        operation_name: &str,
        diagnostics: Option<&DiagnosticFields>,
    ) -> TransactionAttemptResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let started = Instant::now();
        let guild_id = diagnostics.and_then(|d| d.guild_id.as_deref()).unwrap_or("");
        let user_id = diagnostics.and_then(|d| d.user_id.as_deref()).unwrap_or("");

        if self.breaker.is_open() {
            metrics::record_circuit_rejection();
            warn!(
                operation = operation_name,
                guild_id,
                user_id,
                "Circuit breaker open, rejecting operation"
            );
            return TransactionAttemptResult {
                outcome: Err(AppError::circuit_open(operation_name)),
                attempts: 0,
                duration: started.elapsed(),
                was_retried: false,
            };
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            metrics::record_retry_attempt(operation_name);

            let outcome = match tokio::time::timeout(self.policy.attempt_timeout, operation()).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(AppError::timeout(format!(
                    "{} exceeded {}ms",
                    operation_name,
                    self.policy.attempt_timeout.as_millis()
                ))),
            };

            let error = match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempts = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return TransactionAttemptResult {
                        outcome: Ok(value),
                        attempts: attempt,
                        duration: started.elapsed(),
                        was_retried: attempt > 1,
                    };
                }
                Err(e) => e,
            };

            let info = classify_error(&error);
            let retry_budget = self.policy.max_retries.min(info.max_retries);
            let should_retry =
                info.retryable && attempt <= retry_budget && !self.breaker.is_open();

            if !should_retry {
                self.breaker.record_failure();
                error!(
                    operation = operation_name,
                    attempts = attempt,
                    code = info.code,
                    code_name = info.code_name,
                    severity = ?info.severity,
                    retryable = info.retryable,
                    guild_id,
                    user_id,
                    error = %error,
                    "Operation failed"
                );
                return TransactionAttemptResult {
                    outcome: Err(error),
                    attempts: attempt,
                    duration: started.elapsed(),
                    was_retried: attempt > 1,
                };
            }

            let base = self.policy.base_delay.max(info.retry_delay);
            let mut delay = exponential_backoff(base, attempt, self.policy.max_delay);
            if self.policy.jitter {
                delay = add_jitter(delay);
            }

            warn!(
                operation = operation_name,
                attempt,
                code_name = info.code_name,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient error, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// 分类错误并执行回滚
    pub async fn handle_transaction_error(
        &self,
        error: AppError,
        unit_of_work: &mut dyn UnitOfWork,
        operation_name: &str,
        diagnostics: Option<DiagnosticFields>,
    ) -> TransactionErrorReport {
        let error_info = self.classify_error(&error);

        error!(
            operation = operation_name,
            code = error_info.code,
            code_name = error_info.code_name,
            severity = ?error_info.severity,
            error = %error,
            "Handling transaction error"
        );

        let context = self.rollback_service.create_rollback_context(
            &*unit_of_work,
            operation_name,
            error,
            diagnostics.unwrap_or_default(),
        );
        let rollback = self
            .rollback_service
            .perform_rollback(unit_of_work, &context)
            .await;

        let recovery_actions: Vec<String> = error_info
            .recovery_actions
            .iter()
            .map(ToString::to_string)
            .collect();

        info!(
            operation = operation_name,
            transaction_id = ?rollback.transaction_id,
            rollback_success = rollback.success,
            recovery_actions = ?recovery_actions,
            "Transaction error handled"
        );

        TransactionErrorReport {
            error_info,
            rollback,
            recovery_actions,
        }
    }

    pub fn circuit_state(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CircuitState, ErrorSeverity};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use txkit_common::{ManualClock, SessionId, TransactionId};
    use txkit_errors::{StoreError, codes};
    use txkit_ports::UnitOfWorkState;
    use txkit_saga::CompensationAction;

    fn handler_with_clock(threshold: u32) -> (TransactionErrorHandler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::with_clock(
            CircuitBreakerConfig {
                failure_threshold: threshold,
                window: Duration::from_secs(60),
            },
            clock.clone(),
        );
        let handler = TransactionErrorHandler::with_breaker(
            RetryPolicy::default(),
            breaker,
            Arc::new(RollbackService::default()),
        );
        (handler, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_conflict_twice_then_success() {
        let (handler, _clock) = handler_with_clock(5);
        let calls = AtomicU32::new(0);

        let result = handler
            .execute_with_retry(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(StoreError::write_conflict().into())
                        } else {
                            Ok("done")
                        }
                    }
                },
                "update_counter",
                None,
            )
            .await;

        assert!(result.success());
        assert_eq!(result.attempts, 3);
        assert!(result.was_retried);
        assert_eq!(result.into_result().unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_uses_larger_of_base_and_classified_delay() {
        let (handler, _clock) = handler_with_clock(5);
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = handler
            .execute_with_retry(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(StoreError::with_code(codes::LOCK_TIMEOUT, "LockTimeout", "t").into())
                        } else {
                            Ok(())
                        }
                    }
                },
                "lock",
                None,
            )
            .await;

        assert!(result.success());
        let elapsed = started.elapsed();
        // 500ms 加上至多 10% 抖动
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed <= Duration::from_millis(551));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_runs_once() {
        let (handler, _clock) = handler_with_clock(5);
        let calls = AtomicU32::new(0);

        let result: TransactionAttemptResult<()> = handler
            .execute_with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err(StoreError::with_code(codes::TRANSACTION_TOO_LARGE, "TransactionTooLarge", "big")
                            .into())
                    }
                },
                "bulk_insert",
                None,
            )
            .await;

        assert!(!result.success());
        assert_eq!(result.attempts, 1);
        assert!(!result.was_retried);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_capped_by_classification_budget() {
        let (handler, _clock) = handler_with_clock(5);
        let calls = AtomicU32::new(0);

        // LockTimeout 只允许重试 2 次
        let result: TransactionAttemptResult<()> = handler
            .execute_with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(StoreError::with_code(codes::LOCK_TIMEOUT, "LockTimeout", "t").into()) }
                },
                "lock",
                None,
            )
            .await;

        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.circuit_state().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_classified_as_unknown() {
        let (handler, _clock) = handler_with_clock(5);
        let policy_timeout = handler.policy().attempt_timeout;

        let result: TransactionAttemptResult<()> = handler
            .execute_with_retry(
                || async move {
                    tokio::time::sleep(policy_timeout * 2).await;
                    Ok(())
                },
                "slow",
                None,
            )
            .await;

        assert_eq!(result.attempts, 1);
        let err = result.error().unwrap();
        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(handler.classify_error(err).severity, ErrorSeverity::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_and_recovers_after_window() {
        let (handler, clock) = handler_with_clock(2);
        let failing = || async { Err::<(), _>(AppError::domain("boom")) };

        handler.execute_with_retry(failing, "op", None).await;
        handler.execute_with_retry(failing, "op", None).await;
        assert_eq!(handler.circuit_state().state, CircuitState::Open);

        let calls = AtomicU32::new(0);
        let rejected = handler
            .execute_with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                "op",
                None,
            )
            .await;
        assert_eq!(rejected.attempts, 0);
        assert!(matches!(rejected.error(), Some(AppError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        clock.advance(Duration::from_secs(61));
        let recovered = handler
            .execute_with_retry(|| async { Ok(()) }, "op", None)
            .await;
        assert!(recovered.success());
        assert_eq!(recovered.attempts, 1);
        assert_eq!(handler.circuit_state().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let (handler, _clock) = handler_with_clock(2);
        handler
            .execute_with_retry(|| async { Err::<(), _>(AppError::domain("x")) }, "op", None)
            .await;
        assert_eq!(handler.circuit_state().failure_count, 1);

        handler.execute_with_retry(|| async { Ok(()) }, "op", None).await;
        assert_eq!(handler.circuit_state().failure_count, 0);

        handler
            .execute_with_retry(|| async { Err::<(), _>(AppError::domain("x")) }, "op", None)
            .await;
        assert_eq!(handler.circuit_state().state, CircuitState::Closed);

        handler.reset_circuit_breaker();
        assert_eq!(handler.circuit_state().failure_count, 0);
    }

    struct ActiveUnitOfWork {
        state: UnitOfWorkState,
        rollbacks: u32,
    }

    #[async_trait]
    impl UnitOfWork for ActiveUnitOfWork {
        async fn begin(&mut self) -> AppResult<()> {
            Ok(())
        }

        async fn commit(&mut self) -> AppResult<()> {
            Ok(())
        }

        async fn rollback(&mut self) -> AppResult<()> {
            self.rollbacks += 1;
            self.state = UnitOfWorkState::RolledBack;
            Ok(())
        }

        async fn dispose(&mut self) {
            self.state = UnitOfWorkState::Disposed;
        }

        fn state(&self) -> UnitOfWorkState {
            self.state
        }

        fn session_id(&self) -> Option<SessionId> {
            None
        }

        fn transaction_id(&self) -> Option<TransactionId> {
            Some(TransactionId::new("tx-handle"))
        }
    }

    #[tokio::test]
    async fn test_handle_transaction_error_rolls_back() {
        let (handler, _clock) = handler_with_clock(5);
        let tx = TransactionId::new("tx-handle");
        handler.rollback_service().register_compensation_action(
            &tx,
            CompensationAction::new("undo", "undo side effect", || async { Ok(()) }),
        );

        let mut uow = ActiveUnitOfWork {
            state: UnitOfWorkState::Active,
            rollbacks: 0,
        };
        let report = handler
            .handle_transaction_error(
                StoreError::with_code(codes::HOST_UNREACHABLE, "HostUnreachable", "down").into(),
                &mut uow,
                "create_case",
                Some(DiagnosticFields::new().with_guild_id("g-1")),
            )
            .await;

        assert_eq!(report.error_info.severity, ErrorSeverity::Configuration);
        assert!(report.rollback.success);
        assert_eq!(report.rollback.compensations_executed, vec!["undo"]);
        assert!(!report.recovery_actions.is_empty());
        assert_eq!(uow.rollbacks, 1);
        assert_eq!(uow.state, UnitOfWorkState::Disposed);
        assert_eq!(handler.rollback_service().compensation_count(&tx), 0);
    }
}
