//! 故障注入

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use txkit_errors::StoreError;

/// 可注入故障的调用点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    StartSession,
    StartTransaction,
    CommitTransaction,
    AbortTransaction,
}

/// 故障脚本
///
/// 每个调用点维护一个错误队列，调用时先弹出队首错误并直接返回，不触碰存储状态。
#[derive(Debug, Default)]
pub struct FaultPlan {
    queued: Mutex<HashMap<FaultPoint, VecDeque<StoreError>>>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    fn queued(&self) -> MutexGuard<'_, HashMap<FaultPoint, VecDeque<StoreError>>> {
        self.queued.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 下一次调用失败
    pub fn fail_next(&self, point: FaultPoint, error: StoreError) {
        self.queued().entry(point).or_default().push_back(error);
    }

    /// 接下来连续 `times` 次调用失败
    pub fn fail_times(&self, point: FaultPoint, error: StoreError, times: usize) {
        let mut queued = self.queued();
        let queue = queued.entry(point).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// 尚未触发的故障数
    pub fn pending(&self, point: FaultPoint) -> usize {
        self.queued().get(&point).map_or(0, VecDeque::len)
    }

    pub fn clear(&self) {
        self.queued().clear();
    }

    pub(crate) fn take(&self, point: FaultPoint) -> Option<StoreError> {
        let error = self.queued().get_mut(&point)?.pop_front();
        if let Some(e) = &error {
            tracing::debug!(point = ?point, error = %e, "Injected store fault");
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faults_are_consumed_in_order() {
        let plan = FaultPlan::new();
        plan.fail_next(FaultPoint::CommitTransaction, StoreError::new("first"));
        plan.fail_next(FaultPoint::CommitTransaction, StoreError::new("second"));

        assert_eq!(plan.pending(FaultPoint::CommitTransaction), 2);
        assert_eq!(plan.take(FaultPoint::CommitTransaction).unwrap().message, "first");
        assert_eq!(plan.take(FaultPoint::CommitTransaction).unwrap().message, "second");
        assert!(plan.take(FaultPoint::CommitTransaction).is_none());
    }

    #[test]
    fn test_points_are_independent() {
        let plan = FaultPlan::new();
        plan.fail_times(FaultPoint::StartSession, StoreError::write_conflict(), 3);

        assert!(plan.take(FaultPoint::AbortTransaction).is_none());
        assert_eq!(plan.pending(FaultPoint::StartSession), 3);

        plan.clear();
        assert_eq!(plan.pending(FaultPoint::StartSession), 0);
    }
}
