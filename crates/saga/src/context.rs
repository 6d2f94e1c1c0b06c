//! 回滚上下文与回滚结果

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use txkit_common::TransactionId;
use txkit_errors::AppError;

fn serialize_error<S: Serializer>(error: &AppError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

fn serialize_errors<S: Serializer>(errors: &[AppError], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(ToString::to_string))
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

/// 调用方提供的诊断字段
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticFields {
    pub guild_id: Option<String>,
    pub user_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl DiagnosticFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guild_id(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// 一次失败对应的回滚上下文，不做持久化
#[derive(Debug, Clone, Serialize)]
pub struct RollbackContext {
    pub failed_operation: String,
    #[serde(serialize_with = "serialize_error")]
    pub original_error: AppError,
    /// 由会话 ID 派生，没有会话时为 None
    pub transaction_id: Option<TransactionId>,
    pub diagnostics: DiagnosticFields,
    pub occurred_at: DateTime<Utc>,
}

impl RollbackContext {
    pub fn new(failed_operation: impl Into<String>, original_error: AppError) -> Self {
        Self {
            failed_operation: failed_operation.into(),
            original_error,
            transaction_id: None,
            diagnostics: DiagnosticFields::default(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticFields) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// 一次回滚尝试的结果
#[derive(Debug, Clone, Serialize)]
pub struct RollbackResult {
    pub transaction_id: Option<TransactionId>,
    /// 所有阶段都没有错误
    pub success: bool,
    pub compensations_executed: Vec<String>,
    pub compensations_failed: Vec<String>,
    #[serde(serialize_with = "serialize_errors")]
    pub errors: Vec<AppError>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub completed_at: DateTime<Utc>,
}

impl RollbackResult {
    /// 耗时（毫秒，保留小数）
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}
