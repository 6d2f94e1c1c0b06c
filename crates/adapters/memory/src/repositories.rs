//! 基于内存存储的仓储
//!
//! `CounterRepository` 和 `RecordRepository` 声明了事务能力，在 Unit of Work 中
//! 通过注入的会话写入；`AuditLogRepository` 没有声明，写入立即生效。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use txkit_errors::{AppError, AppResult};
use txkit_ports::{Repository, SessionAware, SessionSlot};

use crate::MemoryStore;

pub const COUNTERS: &str = "counters";
pub const RECORDS: &str = "records";
pub const AUDIT_LOG: &str = "audit_log";

fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> AppResult<T> {
    serde_json::from_value(value).map_err(|e| AppError::internal(format!("Corrupt document: {}", e)))
}

fn encode<T: Serialize>(value: &T) -> AppResult<Value> {
    serde_json::to_value(value).map_err(|e| AppError::internal(format!("Unserializable document: {}", e)))
}

/// 计数器仓储
#[derive(Debug)]
pub struct CounterRepository {
    store: Arc<MemoryStore>,
    session: SessionSlot,
}

impl Repository<MemoryStore> for CounterRepository {
    fn create(store: &Arc<MemoryStore>) -> Self {
        Self {
            store: Arc::clone(store),
            session: SessionSlot::new(),
        }
    }

    fn session_capability(&self) -> Option<&dyn SessionAware> {
        Some(&self.session)
    }
}

impl CounterRepository {
    pub fn get(&self, name: &str) -> AppResult<i64> {
        let doc = self.store.read(self.session.session_id(), COUNTERS, name)?;
        Ok(doc.and_then(|d| d["value"].as_i64()).unwrap_or(0))
    }

    /// 自增并返回新值
    pub fn increment(&self, name: &str, by: i64) -> AppResult<i64> {
        let session = self.session.session_id();
        let current = self
            .store
            .read(session, COUNTERS, name)?
            .and_then(|d| d["value"].as_i64())
            .unwrap_or(0);
        let next = current
            .checked_add(by)
            .ok_or_else(|| AppError::domain(format!("counter {} overflow", name)))?;
        self.store
            .write(session, COUNTERS, name, json!({ "value": next }))?;
        Ok(next)
    }

    pub fn is_transactional(&self) -> bool {
        self.session.is_bound()
    }
}

/// 业务记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Record {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload,
        }
    }
}

/// 记录仓储
#[derive(Debug)]
pub struct RecordRepository {
    store: Arc<MemoryStore>,
    session: SessionSlot,
}

impl Repository<MemoryStore> for RecordRepository {
    fn create(store: &Arc<MemoryStore>) -> Self {
        Self {
            store: Arc::clone(store),
            session: SessionSlot::new(),
        }
    }

    fn session_capability(&self) -> Option<&dyn SessionAware> {
        Some(&self.session)
    }
}

impl RecordRepository {
    pub fn insert(&self, record: &Record) -> AppResult<()> {
        let session = self.session.session_id();
        if self.store.read(session, RECORDS, &record.id)?.is_some() {
            return Err(AppError::domain(format!("record {} already exists", record.id)));
        }
        self.store
            .write(session, RECORDS, &record.id, encode(record)?)?;
        Ok(())
    }

    pub fn find(&self, id: &str) -> AppResult<Option<Record>> {
        self.store
            .read(self.session.session_id(), RECORDS, id)?
            .map(decode)
            .transpose()
    }

    pub fn remove(&self, id: &str) -> AppResult<bool> {
        Ok(self.store.delete(self.session.session_id(), RECORDS, id)?)
    }
}

/// 审计日志仓储，不参与事务
#[derive(Debug)]
pub struct AuditLogRepository {
    store: Arc<MemoryStore>,
}

impl Repository<MemoryStore> for AuditLogRepository {
    fn create(store: &Arc<MemoryStore>) -> Self {
        Self {
            store: Arc::clone(store),
        }
    }
}

impl AuditLogRepository {
    pub fn append(&self, id: &str, message: &str) -> AppResult<()> {
        self.store
            .write(None, AUDIT_LOG, id, json!({ "message": message }))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.store.document_count(AUDIT_LOG)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repositories_without_session_write_through() {
        let store = Arc::new(MemoryStore::new());
        let counters = CounterRepository::create(&store);
        assert!(!counters.is_transactional());

        assert_eq!(counters.increment("cases", 2).unwrap(), 2);
        assert_eq!(counters.increment("cases", 1).unwrap(), 3);
        assert_eq!(counters.get("cases").unwrap(), 3);
    }

    #[test]
    fn test_record_insert_and_find() {
        let store = Arc::new(MemoryStore::new());
        let records = RecordRepository::create(&store);
        let record = Record::new("case-1", "case", json!({ "title": "refund" }));

        records.insert(&record).unwrap();
        assert!(records.insert(&record).is_err());
        assert_eq!(records.find("case-1").unwrap(), Some(record));
        assert!(records.remove("case-1").unwrap());
        assert_eq!(records.find("case-1").unwrap(), None);
    }

    #[test]
    fn test_audit_log_has_no_session_capability() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditLogRepository::create(&store);
        assert!(audit.session_capability().is_none());

        audit.append("a-1", "created").unwrap();
        assert_eq!(audit.len(), 1);
    }
}
