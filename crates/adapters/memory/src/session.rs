//! 内存会话

use async_trait::async_trait;
use txkit_common::SessionId;
use txkit_errors::{StoreError, codes};
use txkit_ports::{StoreSession, TransactionSettings};

use crate::MemoryStore;

#[derive(Debug)]
pub struct MemorySession {
    id: SessionId,
    store: MemoryStore,
    in_transaction: bool,
    ended: bool,
}

impl MemorySession {
    pub(crate) fn new(store: MemoryStore) -> Self {
        Self {
            id: SessionId::new(),
            store,
            in_transaction: false,
            ended: false,
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.ended {
            return Err(StoreError::with_code(
                codes::NO_SUCH_SESSION,
                "NoSuchSession",
                format!("session {} has ended", self.id),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn start_transaction(&mut self, settings: &TransactionSettings) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.store.begin_transaction(self.id, settings)?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.store.commit_transaction(self.id)?;
        self.in_transaction = false;
        Ok(())
    }

    async fn abort_transaction(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.store.abort_transaction(self.id)?;
        self.in_transaction = false;
        Ok(())
    }

    async fn end_session(&mut self) {
        if self.ended {
            return;
        }
        self.store.end_session(self.id);
        self.in_transaction = false;
        self.ended = true;
    }
}
