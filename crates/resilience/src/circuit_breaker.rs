//! 断路器
//!
//! 最近一个时间窗口内的失败次数达到阈值即 Closed -> Open，早于窗口的失败不再计数。
//! Open 期间所有调用直接拒绝，距最后一次失败满一个窗口后回到 Closed；
//! 任何一次成功都会立即清零。
//! 不提供 HalfOpen 试探。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use txkit_common::{Clock, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 窗口内触发断开的失败次数
    pub failure_threshold: u32,
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// 断路器状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    /// 窗口内的失败时间，按先后排列
    failures: VecDeque<Instant>,
}

impl CircuitBreakerState {
    fn failure_count(&self) -> u32 {
        u32::try_from(self.failures.len()).unwrap_or(u32::MAX)
    }

    fn clear(&mut self) {
        self.state = CircuitState::Closed;
        self.failures.clear();
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Arc::new(Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 是否处于断开状态（窗口过期时顺带恢复为 Closed）
    pub fn is_open(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        self.expire_window(&mut state, now);
        state.state == CircuitState::Open
    }

    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut state = self.lock();
        self.expire_window(&mut state, now);

        state.failures.push_back(now);

        if state.state == CircuitState::Closed
            && state.failure_count() >= self.config.failure_threshold
        {
            state.state = CircuitState::Open;
            tracing::warn!(
                failures = state.failure_count(),
                window_ms = self.config.window.as_millis() as u64,
                "Circuit breaker transitioned to OPEN"
            );
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.state == CircuitState::Open {
            tracing::info!("Circuit breaker transitioned to CLOSED");
        }
        state.clear();
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = self.clock.now();
        let mut state = self.lock();
        self.expire_window(&mut state, now);
        CircuitSnapshot {
            state: state.state,
            failure_count: state.failure_count(),
        }
    }

    pub fn reset(&self) {
        self.record_success();
    }

    fn expire_window(&self, state: &mut CircuitBreakerState, now: Instant) {
        let window = self.config.window;
        let quiet = state
            .failures
            .back()
            .is_some_and(|last| now.saturating_duration_since(*last) >= window);
        if quiet {
            if state.state == CircuitState::Open {
                tracing::info!("Circuit breaker window elapsed, transitioned to CLOSED");
            }
            state.clear();
            return;
        }

        while state
            .failures
            .front()
            .is_some_and(|first| now.saturating_duration_since(*first) >= window)
        {
            state.failures.pop_front();
        }
    }
}
