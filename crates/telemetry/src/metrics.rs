//! 事务层指标
//!
//! 指标通过 `metrics` facade 记录，未安装 recorder 时为空操作。

use std::time::Duration;

pub const COMMITS_TOTAL: &str = "txkit_commits_total";
pub const COMMIT_RETRIES_TOTAL: &str = "txkit_commit_retries_total";
pub const ROLLBACKS_TOTAL: &str = "txkit_rollbacks_total";
pub const ROLLBACK_DURATION_SECONDS: &str = "txkit_rollback_duration_seconds";
pub const COMPENSATIONS_TOTAL: &str = "txkit_compensations_total";
pub const RETRY_ATTEMPTS_TOTAL: &str = "txkit_retry_attempts_total";
pub const CIRCUIT_BREAKER_REJECTIONS_TOTAL: &str = "txkit_circuit_breaker_rejections_total";

fn outcome(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}

pub fn record_commit(success: bool) {
    ::metrics::counter!(COMMITS_TOTAL, "outcome" => outcome(success)).increment(1);
}

pub fn record_commit_retry() {
    ::metrics::counter!(COMMIT_RETRIES_TOTAL).increment(1);
}

pub fn record_rollback(success: bool, duration: Duration) {
    ::metrics::counter!(ROLLBACKS_TOTAL, "outcome" => outcome(success)).increment(1);
    ::metrics::histogram!(ROLLBACK_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn record_compensation(success: bool) {
    ::metrics::counter!(COMPENSATIONS_TOTAL, "outcome" => outcome(success)).increment(1);
}

pub fn record_retry_attempt(operation: &str) {
    ::metrics::counter!(RETRY_ATTEMPTS_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_circuit_rejection() {
    ::metrics::counter!(CIRCUIT_BREAKER_REJECTIONS_TOTAL).increment(1);
}
