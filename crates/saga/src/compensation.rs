//! 补偿动作

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use txkit_errors::AppResult;

type ExecuteFn = dyn Fn() -> BoxFuture<'static, AppResult<()>> + Send + Sync;

/// 针对一个非事务副作用的撤销/缓解逻辑
///
/// 注册后不可变。优先级越高越先执行，相同优先级按注册顺序执行。
#[derive(Clone)]
pub struct CompensationAction {
    pub id: String,
    pub description: String,
    pub priority: i32,
    pub retryable: bool,
    /// 可重试时的最大尝试次数
    pub max_retries: u32,
    execute: Arc<ExecuteFn>,
}

impl CompensationAction {
    /// 创建补偿动作，默认优先级 0、可重试、最多 3 次
    pub fn new<F, Fut>(id: impl Into<String>, description: impl Into<String>, execute: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            priority: 0,
            retryable: true,
            max_retries: 3,
            execute: Arc::new(move || Box::pin(execute())),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 只尝试一次
    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    /// 实际允许的尝试次数
    pub fn max_attempts(&self) -> u32 {
        if self.retryable {
            self.max_retries.max(1)
        } else {
            1
        }
    }

    pub async fn execute(&self) -> AppResult<()> {
        (self.execute)().await
    }
}

impl fmt::Debug for CompensationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompensationAction")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("priority", &self.priority)
            .field("retryable", &self.retryable)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
