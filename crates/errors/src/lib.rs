//! txkit-errors - 统一错误处理
//!
//! 事务层的所有错误都收敛到 [`AppError`]，存储驱动上报的原始错误由
//! [`StoreError`] 表示（错误码 + 错误标签）。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 驱动错误标签：可整体重试的事务错误
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";

/// 驱动错误标签：提交结果未知
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

/// 常用的存储错误码
pub mod codes {
    pub const HOST_UNREACHABLE: i32 = 6;
    pub const HOST_NOT_FOUND: i32 = 7;
    pub const AUTHENTICATION_FAILED: i32 = 18;
    pub const LOCK_TIMEOUT: i32 = 24;
    pub const MAX_TIME_MS_EXPIRED: i32 = 50;
    pub const NETWORK_TIMEOUT: i32 = 89;
    pub const WRITE_CONFLICT: i32 = 112;
    pub const PRIMARY_STEPPED_DOWN: i32 = 189;
    pub const NO_SUCH_SESSION: i32 = 206;
    pub const TRANSACTION_TOO_OLD: i32 = 225;
    pub const NO_SUCH_TRANSACTION: i32 = 251;
    pub const TRANSACTION_TOO_LARGE: i32 = 257;
    pub const NOT_WRITABLE_PRIMARY: i32 = 10107;
    pub const INTERRUPTED_DUE_TO_REPL_STATE_CHANGE: i32 = 11602;
    pub const NOT_PRIMARY_NO_SECONDARY_OK: i32 = 13435;
    pub const NOT_PRIMARY_OR_SECONDARY: i32 = 13436;
}

/// 存储驱动返回的原始错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{}", self.render())]
pub struct StoreError {
    pub code: Option<i32>,
    pub code_name: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            code_name: None,
            labels: Vec::new(),
            message: message.into(),
        }
    }

    /// 带错误码的驱动错误
    pub fn with_code(code: i32, code_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            code_name: Some(code_name.into()),
            labels: Vec::new(),
            message: message.into(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// 写冲突（错误码 112，驱动会同时打上 TransientTransactionError 标签）
    pub fn write_conflict() -> Self {
        Self::with_code(
            codes::WRITE_CONFLICT,
            "WriteConflict",
            "write conflict during transaction",
        )
        .with_label(TRANSIENT_TRANSACTION_ERROR)
    }

    fn render(&self) -> String {
        let mut out = match (&self.code, &self.code_name) {
            (Some(code), Some(name)) => format!("[{} {}] {}", code, name, self.message),
            (Some(code), None) => format!("[{}] {}", code, self.message),
            _ => self.message.clone(),
        };
        if !self.labels.is_empty() {
            out.push_str(&format!(" (labels: {})", self.labels.join(", ")));
        }
        out
    }
}


/// 应用错误类型
#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No active transaction: {0}")]
    NotActive(String),

    #[error("Transaction {transaction_id} failed to commit after {attempts} attempt(s): {source}")]
    CommitFailed {
        transaction_id: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Circuit breaker is open: {0}")]
    CircuitOpen(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Compensation action {action_id} failed after {attempts} attempt(s): {message}")]
    Compensation {
        action_id: String,
        attempts: u32,
        message: String,
    },

    #[error("Domain error: {0}")]
    Domain(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn not_active(msg: impl Into<String>) -> Self {
        Self::NotActive(msg.into())
    }

    pub fn circuit_open(msg: impl Into<String>) -> Self {
        Self::CircuitOpen(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn domain(msg: impl Into<String>) -> Self {
        Self::Domain(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// 最接近的驱动错误（穿透 CommitFailed 包装）
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            Self::CommitFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// 驱动错误码
    pub fn code(&self) -> Option<i32> {
        self.store_error().and_then(|e| e.code)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.store_error().is_some_and(|e| e.has_label(label))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Store(_) => "store",
            Self::InvalidState(_) => "invalid_state",
            Self::NotActive(_) => "not_active",
            Self::CommitFailed { .. } => "commit_failed",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Timeout(_) => "timeout",
            Self::Compensation { .. } => "compensation",
            Self::Domain(_) => "domain",
            Self::Configuration(_) => "configuration",
            Self::Internal(_) => "internal",
        }
    }

    /// 转换为可序列化的错误报告，用于日志留证
    pub fn to_report(&self) -> ErrorReport {
        let store = self.store_error();
        ErrorReport {
            kind: self.kind().to_string(),
            detail: self.to_string(),
            code: store.and_then(|e| e.code),
            code_name: store.and_then(|e| e.code_name.clone()),
            labels: store.map(|e| e.labels.clone()).unwrap_or_default(),
        }
    }
}

/// 错误报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl ErrorReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.detail.clone())
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;
