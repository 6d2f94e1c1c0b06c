//! 回滚服务
//!
//! 失败时分三个阶段执行，每个阶段互相隔离：
//! 1. 中止存储事务；
//! 2. 按优先级依次执行补偿动作，每个动作独立重试；
//! 3. 释放 Unit of Work 并清空该事务的补偿注册表。

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use txkit_common::{RetryConfig, TransactionId, with_retry};
use txkit_errors::AppError;
use txkit_ports::UnitOfWork;
use txkit_telemetry::metrics;

use crate::{CompensationAction, DiagnosticFields, RollbackContext, RollbackResult};

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {}>", e))
}

/// 回滚服务配置
#[derive(Debug, Clone)]
pub struct RollbackServiceConfig {
    /// 回滚历史最多保留条数，超出后淘汰最早的记录
    pub history_limit: usize,
    /// 补偿重试基础延迟，第 n 次失败后等待 `base * 2^(n-1)`
    pub compensation_base_delay: Duration,
    pub compensation_max_delay: Duration,
}

impl Default for RollbackServiceConfig {
    fn default() -> Self {
        Self {
            history_limit: 1_000,
            compensation_base_delay: Duration::from_millis(1_000),
            compensation_max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct RollbackHistory {
    entries: HashMap<TransactionId, RollbackResult>,
    order: VecDeque<TransactionId>,
}

impl RollbackHistory {
    fn insert(&mut self, transaction_id: TransactionId, result: RollbackResult, limit: usize) {
        if self.entries.insert(transaction_id.clone(), result).is_some() {
            self.order.retain(|id| id != &transaction_id);
        }
        self.order.push_back(transaction_id);

        while self.order.len() > limit.max(1) {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, transaction_id: &TransactionId) {
        if self.entries.remove(transaction_id).is_some() {
            self.order.retain(|id| id != transaction_id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 回滚服务
///
/// 补偿注册表和回滚历史都归本实例所有，按事务 ID 分组。
#[derive(Debug, Default)]
pub struct RollbackService {
    config: RollbackServiceConfig,
    compensations: Mutex<HashMap<TransactionId, Vec<CompensationAction>>>,
    history: Mutex<RollbackHistory>,
}

impl RollbackService {
    pub fn new(config: RollbackServiceConfig) -> Self {
        Self {
            config,
            compensations: Mutex::new(HashMap::new()),
            history: Mutex::new(RollbackHistory::default()),
        }
    }

    /// 注册补偿动作，按优先级降序保持有序（稳定排序，同优先级保留注册顺序）
    pub fn register_compensation_action(
        &self,
        transaction_id: &TransactionId,
        action: CompensationAction,
    ) {
        debug!(
            transaction_id = %transaction_id,
            action_id = %action.id,
            priority = action.priority,
            "Registering compensation action"
        );

        let mut registry = lock(&self.compensations);
        let actions = registry.entry(transaction_id.clone()).or_default();
        actions.push(action);
        actions.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// 已注册的补偿动作数量
    pub fn compensation_count(&self, transaction_id: &TransactionId) -> usize {
        lock(&self.compensations)
            .get(transaction_id)
            .map_or(0, Vec::len)
    }

    /// 根据 Unit of Work 构造回滚上下文
    pub fn create_rollback_context(
        &self,
        unit_of_work: &dyn UnitOfWork,
        operation_name: &str,
        error: AppError,
        diagnostics: DiagnosticFields,
    ) -> RollbackContext {
        let mut context = RollbackContext::new(operation_name, error).with_diagnostics(diagnostics);
        context.transaction_id = unit_of_work.transaction_id();
        context
    }

    /// 执行回滚
    ///
    /// 不会返回错误：每个阶段的失败都记录在 [`RollbackResult::errors`] 中。
    pub async fn perform_rollback(
        &self,
        unit_of_work: &mut dyn UnitOfWork,
        context: &RollbackContext,
    ) -> RollbackResult {
        let started = Instant::now();
        let transaction_id = context.transaction_id.clone();
        let tx_label = transaction_id
            .as_ref()
            .map_or_else(|| "none".to_string(), ToString::to_string);

        warn!(
            transaction_id = %tx_label,
            operation = %context.failed_operation,
            context = %to_json(context),
            "Starting rollback"
        );

        let mut errors = Vec::new();
        let mut compensations_executed = Vec::new();
        let mut compensations_failed = Vec::new();

        // 阶段 1：中止存储事务
        if let Err(e) = unit_of_work.rollback().await {
            error!(transaction_id = %tx_label, error = %e, "Failed to abort store transaction");
            errors.push(e);
        }

        // 阶段 2：按优先级依次执行补偿
        let actions = transaction_id
            .as_ref()
            .and_then(|id| lock(&self.compensations).get(id).cloned())
            .unwrap_or_default();

        for action in &actions {
            match self.run_compensation(action, &tx_label).await {
                Ok(()) => {
                    metrics::record_compensation(true);
                    compensations_executed.push(action.id.clone());
                }
                Err(e) => {
                    metrics::record_compensation(false);
                    compensations_failed.push(action.id.clone());
                    errors.push(e);
                }
            }
        }

        // 阶段 3：释放资源
        unit_of_work.dispose().await;
        if let Some(id) = &transaction_id {
            lock(&self.compensations).remove(id);
        }

        let duration = started.elapsed();
        let result = RollbackResult {
            transaction_id: transaction_id.clone(),
            success: errors.is_empty(),
            compensations_executed,
            compensations_failed,
            errors,
            duration,
            completed_at: Utc::now(),
        };

        metrics::record_rollback(result.success, duration);
        if result.success {
            info!(
                transaction_id = %tx_label,
                compensations = result.compensations_executed.len(),
                duration_ms = result.duration_ms(),
                "Rollback completed"
            );
        } else {
            error!(
                transaction_id = %tx_label,
                errors = result.errors.len(),
                result = %to_json(&result),
                "Rollback completed with errors"
            );
        }

        if let Some(id) = transaction_id {
            lock(&self.history).insert(id, result.clone(), self.config.history_limit);
        }

        result
    }

    async fn run_compensation(
        &self,
        action: &CompensationAction,
        tx_label: &str,
    ) -> Result<(), AppError> {
        let retry = RetryConfig::new(
            action.max_attempts(),
            self.config.compensation_base_delay,
            self.config.compensation_max_delay,
        );
        let operation = format!("compensation:{}", action.id);
        let mut attempts = 0u32;

        debug!(
            transaction_id = %tx_label,
            action_id = %action.id,
            description = %action.description,
            "Executing compensation action"
        );

        let outcome = with_retry(&retry, &operation, || {
            attempts += 1;
            action.execute()
        })
        .await;

        outcome.map_err(|e| {
            error!(
                transaction_id = %tx_label,
                action_id = %action.id,
                attempts,
                error = %e,
                "Compensation action failed"
            );
            AppError::Compensation {
                action_id: action.id.clone(),
                attempts,
                message: e.to_string(),
            }
        })
    }

    pub fn get_rollback_history(&self, transaction_id: &TransactionId) -> Option<RollbackResult> {
        lock(&self.history).entries.get(transaction_id).cloned()
    }

    pub fn history_len(&self) -> usize {
        lock(&self.history).entries.len()
    }

    /// 成功路径上的清理：移除补偿注册和回滚历史
    pub fn clear_transaction(&self, transaction_id: &TransactionId) {
        lock(&self.compensations).remove(transaction_id);
        lock(&self.history).remove(transaction_id);
    }
}
