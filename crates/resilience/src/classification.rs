//! 存储错误分类表
//!
//! 每个已知错误码对应一条只读的 [`TransactionErrorInfo`]。查不到错误码时退回到
//! 错误标签判断，最后归为 `Unknown`（不可重试）。

use std::time::Duration;

use serde::Serialize;
use tracing::warn;
use txkit_errors::{
    AppError, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT, codes,
};

/// 错误严重程度，决定重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorSeverity {
    /// 重试后预期可以成功
    Transient,
    /// 需要调用方重新发起逻辑操作
    Permanent,
    /// 需要运维介入
    Configuration,
    Unknown,
}

/// 一个错误码的分类信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionErrorInfo {
    pub code: Option<i32>,
    pub code_name: &'static str,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    /// 基础退避
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub description: &'static str,
    /// 给运维的处理建议，仅用于日志
    pub recovery_actions: &'static [&'static str],
}

impl TransactionErrorInfo {
    pub fn is_transient(&self) -> bool {
        self.severity == ErrorSeverity::Transient
    }
}

const fn transient(
    code: i32,
    code_name: &'static str,
    delay_ms: u64,
    max_retries: u32,
    description: &'static str,
    recovery_actions: &'static [&'static str],
) -> TransactionErrorInfo {
    TransactionErrorInfo {
        code: Some(code),
        code_name,
        severity: ErrorSeverity::Transient,
        retryable: true,
        retry_delay: Duration::from_millis(delay_ms),
        max_retries,
        description,
        recovery_actions,
    }
}

const fn fatal(
    code: i32,
    code_name: &'static str,
    severity: ErrorSeverity,
    description: &'static str,
    recovery_actions: &'static [&'static str],
) -> TransactionErrorInfo {
    TransactionErrorInfo {
        code: Some(code),
        code_name,
        severity,
        retryable: false,
        retry_delay: Duration::ZERO,
        max_retries: 0,
        description,
        recovery_actions,
    }
}

const TOPOLOGY_ACTIONS: &[&str] = &[
    "Wait for replica set election to complete",
    "Check replica set health",
];

static ERROR_TABLE: &[TransactionErrorInfo] = &[
    transient(
        codes::WRITE_CONFLICT,
        "WriteConflict",
        50,
        5,
        "Concurrent transaction modified the same document",
        &["Retry the transaction", "Reduce contention on hot documents"],
    ),
    transient(
        codes::NO_SUCH_TRANSACTION,
        "NoSuchTransaction",
        200,
        2,
        "Transaction not found on the server, possibly aborted",
        &["Restart the transaction"],
    ),
    transient(
        codes::NETWORK_TIMEOUT,
        "NetworkTimeout",
        1000,
        3,
        "Network operation timed out",
        &["Check network connectivity", "Check database server load"],
    ),
    transient(
        codes::LOCK_TIMEOUT,
        "LockTimeout",
        500,
        2,
        "Timed out waiting for a lock",
        &["Retry later", "Look for long-running transactions holding locks"],
    ),
    transient(
        codes::NOT_WRITABLE_PRIMARY,
        "NotWritablePrimary",
        1000,
        3,
        "Node is no longer primary",
        TOPOLOGY_ACTIONS,
    ),
    transient(
        codes::NOT_PRIMARY_NO_SECONDARY_OK,
        "NotPrimaryNoSecondaryOk",
        1000,
        3,
        "Node is not primary and secondary reads are not allowed",
        TOPOLOGY_ACTIONS,
    ),
    transient(
        codes::NOT_PRIMARY_OR_SECONDARY,
        "NotPrimaryOrSecondary",
        1000,
        3,
        "Node is neither primary nor secondary",
        TOPOLOGY_ACTIONS,
    ),
    transient(
        codes::PRIMARY_STEPPED_DOWN,
        "PrimarySteppedDown",
        2000,
        2,
        "Primary stepped down during the operation",
        TOPOLOGY_ACTIONS,
    ),
    transient(
        codes::INTERRUPTED_DUE_TO_REPL_STATE_CHANGE,
        "InterruptedDueToReplStateChange",
        2000,
        2,
        "Operation interrupted by a replica state change",
        TOPOLOGY_ACTIONS,
    ),
    fatal(
        codes::HOST_UNREACHABLE,
        "HostUnreachable",
        ErrorSeverity::Configuration,
        "Database host is unreachable",
        &["Check the connection string", "Check firewall and DNS"],
    ),
    fatal(
        codes::HOST_NOT_FOUND,
        "HostNotFound",
        ErrorSeverity::Configuration,
        "Database host could not be resolved",
        &["Check the connection string", "Check DNS"],
    ),
    fatal(
        codes::AUTHENTICATION_FAILED,
        "AuthenticationFailed",
        ErrorSeverity::Configuration,
        "Authentication against the database failed",
        &["Check database credentials"],
    ),
    fatal(
        codes::MAX_TIME_MS_EXPIRED,
        "MaxTimeMSExpired",
        ErrorSeverity::Permanent,
        "Operation exceeded its maximum execution time",
        &["Split the operation into smaller units", "Raise max commit time"],
    ),
    fatal(
        codes::NO_SUCH_SESSION,
        "NoSuchSession",
        ErrorSeverity::Permanent,
        "Session expired or does not exist",
        &["Start a new logical operation with a fresh session"],
    ),
    fatal(
        codes::TRANSACTION_TOO_OLD,
        "TransactionTooOld",
        ErrorSeverity::Permanent,
        "Transaction is too old to continue",
        &["Start a new logical operation", "Shorten the transaction"],
    ),
    fatal(
        codes::TRANSACTION_TOO_LARGE,
        "TransactionTooLarge",
        ErrorSeverity::Permanent,
        "Transaction exceeded the size limit",
        &["Split the writes across several transactions"],
    ),
];

static TRANSIENT_LABEL_INFO: TransactionErrorInfo = TransactionErrorInfo {
    code: None,
    code_name: TRANSIENT_TRANSACTION_ERROR,
    severity: ErrorSeverity::Transient,
    retryable: true,
    retry_delay: Duration::from_millis(100),
    max_retries: 3,
    description: "Transient transaction error reported by the driver",
    recovery_actions: &["Retry the whole transaction"],
};

static UNKNOWN_COMMIT_RESULT_INFO: TransactionErrorInfo = TransactionErrorInfo {
    code: None,
    code_name: UNKNOWN_TRANSACTION_COMMIT_RESULT,
    severity: ErrorSeverity::Transient,
    retryable: true,
    retry_delay: Duration::from_millis(100),
    max_retries: 2,
    description: "Commit outcome unknown, commit may be retried",
    recovery_actions: &["Retry the commit", "Verify the write landed before redoing side effects"],
};

/// 按错误码查表
pub fn lookup_error_code(code: i32) -> Option<&'static TransactionErrorInfo> {
    ERROR_TABLE.iter().find(|info| info.code == Some(code))
}

/// 分类表中所有条目
pub fn known_error_codes() -> &'static [TransactionErrorInfo] {
    ERROR_TABLE
}

/// 对错误进行分类
pub fn classify_error(error: &AppError) -> TransactionErrorInfo {
    if let Some(info) = error.code().and_then(lookup_error_code) {
        return info.clone();
    }

    if error.has_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) {
        let mut info = UNKNOWN_COMMIT_RESULT_INFO.clone();
        info.code = error.code();
        return info;
    }

    if error.has_label(TRANSIENT_TRANSACTION_ERROR) {
        let mut info = TRANSIENT_LABEL_INFO.clone();
        info.code = error.code();
        return info;
    }

    warn!(
        error = %error,
        report = %error.to_report().to_json(),
        "Unclassified transaction error"
    );

    TransactionErrorInfo {
        code: error.code(),
        code_name: "Unknown",
        severity: ErrorSeverity::Unknown,
        retryable: false,
        retry_delay: Duration::ZERO,
        max_retries: 0,
        description: "Unrecognized error",
        recovery_actions: &["Inspect the logged error and extend the classification table"],
    }
}
