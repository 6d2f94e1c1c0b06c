//! 内存存储

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use txkit_common::SessionId;
use txkit_errors::{StoreError, codes};
use txkit_ports::{SessionProvider, StoreSession, TransactionSettings};

use crate::{FaultPlan, FaultPoint, MemorySession};

type DocumentKey = (String, String);

#[derive(Debug, Clone)]
struct StoredDocument {
    version: u64,
    body: Value,
}

#[derive(Debug)]
struct PendingTransaction {
    settings: TransactionSettings,
    /// 暂存写入，`None` 表示删除
    writes: BTreeMap<DocumentKey, Option<Value>>,
    /// 事务首次接触文档时看到的版本，0 表示文档不存在
    observed: HashMap<DocumentKey, u64>,
}

#[derive(Debug, Default)]
struct StoreState {
    collections: HashMap<String, BTreeMap<String, StoredDocument>>,
    transactions: HashMap<SessionId, PendingTransaction>,
    stats: StoreStats,
}

impl StoreState {
    fn version_of(&self, key: &DocumentKey) -> u64 {
        self.collections
            .get(&key.0)
            .and_then(|docs| docs.get(&key.1))
            .map_or(0, |doc| doc.version)
    }

    fn committed(&self, key: &DocumentKey) -> Option<Value> {
        self.collections
            .get(&key.0)
            .and_then(|docs| docs.get(&key.1))
            .map(|doc| doc.body.clone())
    }

    fn apply(&mut self, key: DocumentKey, body: Option<Value>) -> bool {
        let version = self.version_of(&key);
        let (collection, id) = key;
        let docs = self.collections.entry(collection).or_default();
        match body {
            Some(body) => {
                docs.insert(
                    id,
                    StoredDocument {
                        version: version + 1,
                        body,
                    },
                );
                true
            }
            None => docs.remove(&id).is_some(),
        }
    }
}

/// 存储调用统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub sessions_started: u32,
    pub sessions_ended: u32,
    pub transactions_started: u32,
    /// 所有 commit 调用，含失败
    pub commit_calls: u32,
    pub commits: u32,
    pub aborts: u32,
}

fn no_such_transaction(session_id: SessionId) -> StoreError {
    StoreError::with_code(
        codes::NO_SUCH_TRANSACTION,
        "NoSuchTransaction",
        format!("no transaction in progress for session {}", session_id),
    )
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<StoreState>,
    faults: FaultPlan,
}

/// 内存事务存储
///
/// 克隆开销很小，所有克隆共享同一份数据。
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.shared.faults
    }

    pub fn stats(&self) -> StoreStats {
        self.state().stats
    }

    /// 尚未结束的事务数
    pub fn active_transactions(&self) -> usize {
        self.state().transactions.len()
    }

    /// 会话当前事务的参数
    pub fn transaction_settings(&self, session_id: SessionId) -> Option<TransactionSettings> {
        self.state()
            .transactions
            .get(&session_id)
            .map(|tx| tx.settings.clone())
    }

    /// 读取文档；带会话时能读到本事务尚未提交的写入
    pub fn read(
        &self,
        session: Option<SessionId>,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, StoreError> {
        let key = (collection.to_string(), id.to_string());
        let mut state = self.state();

        let Some(session_id) = session else {
            return Ok(state.committed(&key));
        };

        let version = state.version_of(&key);
        let committed = state.committed(&key);
        let tx = state
            .transactions
            .get_mut(&session_id)
            .ok_or_else(|| no_such_transaction(session_id))?;
        tx.observed.entry(key.clone()).or_insert(version);

        match tx.writes.get(&key) {
            Some(staged) => Ok(staged.clone()),
            None => Ok(committed),
        }
    }

    /// 写入文档；不带会话时立即生效
    pub fn write(
        &self,
        session: Option<SessionId>,
        collection: &str,
        id: &str,
        body: Value,
    ) -> Result<(), StoreError> {
        self.stage(session, (collection.to_string(), id.to_string()), Some(body))
            .map(|_| ())
    }

    /// 删除文档，返回删除前文档是否存在
    pub fn delete(
        &self,
        session: Option<SessionId>,
        collection: &str,
        id: &str,
    ) -> Result<bool, StoreError> {
        self.stage(session, (collection.to_string(), id.to_string()), None)
    }

    fn stage(
        &self,
        session: Option<SessionId>,
        key: DocumentKey,
        body: Option<Value>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();

        let Some(session_id) = session else {
            return Ok(state.apply(key, body));
        };

        let version = state.version_of(&key);
        let committed_exists = version > 0;
        let tx = state
            .transactions
            .get_mut(&session_id)
            .ok_or_else(|| no_such_transaction(session_id))?;
        tx.observed.entry(key.clone()).or_insert(version);
        let existed = match tx.writes.get(&key) {
            Some(staged) => staged.is_some(),
            None => committed_exists,
        };
        tx.writes.insert(key, body);
        Ok(existed)
    }

    /// 已提交的文档
    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.state()
            .committed(&(collection.to_string(), id.to_string()))
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.state()
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    pub(crate) fn begin_transaction(
        &self,
        session_id: SessionId,
        settings: &TransactionSettings,
    ) -> Result<(), StoreError> {
        if let Some(error) = self.faults().take(FaultPoint::StartTransaction) {
            return Err(error);
        }

        let mut state = self.state();
        if state.transactions.contains_key(&session_id) {
            return Err(StoreError::new(format!(
                "transaction already in progress for session {}",
                session_id
            )));
        }
        state.transactions.insert(
            session_id,
            PendingTransaction {
                settings: settings.clone(),
                writes: BTreeMap::new(),
                observed: HashMap::new(),
            },
        );
        state.stats.transactions_started += 1;
        debug!(
            session_id = %session_id,
            read_concern = settings.read_concern.as_str(),
            "Transaction started"
        );
        Ok(())
    }

    /// 提交：先检查写冲突，全部通过后原子应用
    pub(crate) fn commit_transaction(&self, session_id: SessionId) -> Result<(), StoreError> {
        self.state().stats.commit_calls += 1;

        if let Some(error) = self.faults().take(FaultPoint::CommitTransaction) {
            return Err(error);
        }

        let mut state = self.state();
        let tx = state
            .transactions
            .get(&session_id)
            .ok_or_else(|| no_such_transaction(session_id))?;

        let conflicted = tx.writes.keys().find(|key| {
            let seen = tx.observed.get(*key).copied().unwrap_or(0);
            state.version_of(key) != seen
        });
        if let Some((collection, id)) = conflicted {
            debug!(
                session_id = %session_id,
                collection = %collection,
                id = %id,
                "Write conflict detected"
            );
            return Err(StoreError::write_conflict());
        }

        let Some(tx) = state.transactions.remove(&session_id) else {
            return Err(no_such_transaction(session_id));
        };
        let writes = tx.writes.len();
        for (key, body) in tx.writes {
            state.apply(key, body);
        }
        state.stats.commits += 1;
        debug!(session_id = %session_id, writes, "Transaction committed");
        Ok(())
    }

    pub(crate) fn abort_transaction(&self, session_id: SessionId) -> Result<(), StoreError> {
        if let Some(error) = self.faults().take(FaultPoint::AbortTransaction) {
            return Err(error);
        }

        let mut state = self.state();
        if state.transactions.remove(&session_id).is_none() {
            return Err(no_such_transaction(session_id));
        }
        state.stats.aborts += 1;
        debug!(session_id = %session_id, "Transaction aborted");
        Ok(())
    }

    pub(crate) fn end_session(&self, session_id: SessionId) {
        let mut state = self.state();
        state.transactions.remove(&session_id);
        state.stats.sessions_ended += 1;
    }
}

#[async_trait]
impl SessionProvider for MemoryStore {
    async fn start_session(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        if let Some(error) = self.faults().take(FaultPoint::StartSession) {
            return Err(error);
        }

        let session = MemorySession::new(self.clone());
        self.state().stats.sessions_started += 1;
        debug!(session_id = %session.id(), "Session started");
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use txkit_ports::{ReadConcern, WriteConcern};

    fn settings() -> TransactionSettings {
        TransactionSettings {
            read_concern: ReadConcern::Snapshot,
            write_concern: WriteConcern::majority(),
            max_commit_time: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_writes_invisible_until_commit() {
        let store = MemoryStore::new();
        let session = SessionId::new();
        store.begin_transaction(session, &settings()).unwrap();

        store
            .write(Some(session), "records", "r1", json!({"n": 1}))
            .unwrap();
        assert!(store.document("records", "r1").is_none());
        assert_eq!(
            store.read(Some(session), "records", "r1").unwrap(),
            Some(json!({"n": 1}))
        );

        store.commit_transaction(session).unwrap();
        assert_eq!(store.document("records", "r1"), Some(json!({"n": 1})));
        assert_eq!(store.active_transactions(), 0);
    }

    #[test]
    fn test_abort_discards_writes() {
        let store = MemoryStore::new();
        let session = SessionId::new();
        store.begin_transaction(session, &settings()).unwrap();
        store.write(Some(session), "records", "r1", json!(1)).unwrap();

        store.abort_transaction(session).unwrap();
        assert_eq!(store.document_count("records"), 0);
        assert_eq!(store.stats().aborts, 1);
    }

    #[test]
    fn test_concurrent_update_is_a_write_conflict() {
        let store = MemoryStore::new();
        store.write(None, "counters", "c", json!(0)).unwrap();

        let first = SessionId::new();
        let second = SessionId::new();
        store.begin_transaction(first, &settings()).unwrap();
        store.begin_transaction(second, &settings()).unwrap();

        store.write(Some(first), "counters", "c", json!(1)).unwrap();
        store.write(Some(second), "counters", "c", json!(2)).unwrap();

        store.commit_transaction(first).unwrap();
        let err = store.commit_transaction(second).unwrap_err();
        assert_eq!(err.code, Some(codes::WRITE_CONFLICT));
        assert_eq!(store.document("counters", "c"), Some(json!(1)));
    }

    #[test]
    fn test_write_without_transaction_rejected() {
        let store = MemoryStore::new();
        let err = store
            .write(Some(SessionId::new()), "records", "r1", json!(1))
            .unwrap_err();
        assert_eq!(err.code, Some(codes::NO_SUCH_TRANSACTION));
    }

    #[test]
    fn test_injected_commit_fault_keeps_transaction() {
        let store = MemoryStore::new();
        let session = SessionId::new();
        store.begin_transaction(session, &settings()).unwrap();
        store.write(Some(session), "records", "r1", json!(1)).unwrap();
        store
            .faults()
            .fail_next(FaultPoint::CommitTransaction, StoreError::write_conflict());

        assert!(store.commit_transaction(session).is_err());
        store.commit_transaction(session).unwrap();

        let stats = store.stats();
        assert_eq!(stats.commit_calls, 2);
        assert_eq!(stats.commits, 1);
        assert_eq!(store.document("records", "r1"), Some(json!(1)));
    }

    #[test]
    fn test_delete_reports_existence() {
        let store = MemoryStore::new();
        store.write(None, "records", "r1", json!(1)).unwrap();
        let session = SessionId::new();
        store.begin_transaction(session, &settings()).unwrap();

        assert!(store.delete(Some(session), "records", "r1").unwrap());
        assert!(!store.delete(Some(session), "records", "r1").unwrap());
        assert_eq!(store.read(Some(session), "records", "r1").unwrap(), None);

        store.commit_transaction(session).unwrap();
        assert_eq!(store.document_count("records"), 0);
    }
}
