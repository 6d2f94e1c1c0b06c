//! 事务选项

use std::time::Duration;

use txkit_common::RetryConfig;
use txkit_ports::{ReadConcern, TransactionSettings, WriteConcern};

/// 提交重试的基础退避，第 n 次失败后等待 `100ms * 2^(n-1)`
pub const COMMIT_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// 提交重试退避上限
pub const COMMIT_RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// 事务选项
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// 读关注级别
    pub read_concern: ReadConcern,
    /// 写关注级别
    pub write_concern: WriteConcern,
    /// 服务端事务最长执行时间
    pub max_commit_time: Duration,
    /// 首次提交之后最多再重试的次数
    pub max_retries: u32,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            read_concern: ReadConcern::Majority,
            write_concern: WriteConcern::majority(),
            max_commit_time: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_concern(mut self, read_concern: ReadConcern) -> Self {
        self.read_concern = read_concern;
        self
    }

    pub fn with_write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = write_concern;
        self
    }

    pub fn with_max_commit_time(mut self, max_commit_time: Duration) -> Self {
        self.max_commit_time = max_commit_time;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 下发给存储的事务参数
    pub fn settings(&self) -> TransactionSettings {
        TransactionSettings {
            read_concern: self.read_concern,
            write_concern: self.write_concern.clone(),
            max_commit_time: self.max_commit_time,
        }
    }

    /// 提交阶段的重试配置
    pub(crate) fn commit_retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_retries.saturating_add(1),
            COMMIT_RETRY_BASE_DELAY,
            COMMIT_RETRY_MAX_DELAY,
        )
    }
}
