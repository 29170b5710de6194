//! Transaction Management
//!
//! Scoped unit-of-work over a driver session. Each migration gets its own
//! [`TransactionalSession`]; when transactions are disabled by configuration
//! every operation is a no-op and writes run outside any session.

use std::sync::Arc;

use tidemark_core::TransactionMode;
use tracing::{debug, warn};

use crate::backends::{DocumentClient, DocumentSession, DriverError, DriverResult};

/// Driver session wrapper with configurable transaction support
pub struct TransactionalSession {
    client: Arc<dyn DocumentClient>,
    mode: TransactionMode,
    inner: Option<Box<dyn DocumentSession>>,
    active: bool,
}

impl TransactionalSession {
    pub fn new(client: Arc<dyn DocumentClient>, mode: TransactionMode) -> Self {
        Self {
            client,
            mode,
            inner: None,
            active: false,
        }
    }

    /// Acquire a driver session. Must precede [`begin`](Self::begin).
    pub async fn start(&mut self) -> DriverResult<()> {
        if !self.mode.is_enabled() {
            return Ok(());
        }
        if self.inner.is_some() {
            return Err(DriverError::Session("Session already started".to_string()));
        }

        debug!(backend = self.client.backend_name(), "Starting session");
        self.inner = Some(self.client.start_session().await?);
        Ok(())
    }

    /// Begin a transaction on the started session
    pub async fn begin(&mut self) -> DriverResult<()> {
        if !self.mode.is_enabled() {
            return Ok(());
        }

        let session = self
            .inner
            .as_mut()
            .ok_or_else(|| DriverError::Session("Session not started".to_string()))?;
        session.begin_transaction().await?;
        self.active = true;
        debug!("Transaction started");
        Ok(())
    }

    pub async fn commit(&mut self) -> DriverResult<()> {
        if !self.mode.is_enabled() {
            return Ok(());
        }

        let session = self.open_transaction()?;
        debug!("Committing transaction");
        let result = session.commit_transaction().await;
        self.active = false;
        result
    }

    pub async fn abort(&mut self) -> DriverResult<()> {
        if !self.mode.is_enabled() {
            return Ok(());
        }

        let session = self.open_transaction()?;
        debug!("Aborting transaction");
        let result = session.abort_transaction().await;
        self.active = false;
        result
    }

    /// The driver session to pass to collection operations, if any
    pub fn session(&mut self) -> Option<&mut dyn DocumentSession> {
        match &mut self.inner {
            Some(session) => Some(session.as_mut()),
            None => None,
        }
    }

    /// Check if a transaction is open
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn open_transaction(&mut self) -> DriverResult<&mut Box<dyn DocumentSession>> {
        match self.inner.as_mut() {
            Some(session) if self.active => Ok(session),
            _ => Err(DriverError::Transaction(
                "No transaction in progress".to_string(),
            )),
        }
    }
}

impl Drop for TransactionalSession {
    /// The driver discards uncommitted writes when the session goes away
    fn drop(&mut self) {
        if self.active {
            warn!("Transaction dropped without commit or abort, uncommitted writes are discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Document, FailPoint, MemoryClient};

    fn memory() -> (MemoryClient, Arc<dyn DocumentClient>) {
        let client = MemoryClient::new();
        let shared: Arc<dyn DocumentClient> = Arc::new(client.clone());
        (client, shared)
    }

    #[tokio::test]
    async fn test_begin_requires_start() {
        let (_, client) = memory();
        let mut tx = TransactionalSession::new(client, TransactionMode::Enabled);

        let err = tx.begin().await.unwrap_err();
        assert!(matches!(err, DriverError::Session(_)));
        assert!(!tx.is_active());
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let (memory, client) = memory();
        let users = client.database("app").collection("users");
        let mut tx = TransactionalSession::new(client, TransactionMode::Enabled);

        tx.start().await.unwrap();
        tx.begin().await.unwrap();
        assert!(tx.is_active());
        users.insert_one(tx.session(), Document::new()).await.unwrap();
        assert!(memory.documents("app", "users").is_empty());

        tx.commit().await.unwrap();
        assert!(!tx.is_active());
        assert_eq!(memory.documents("app", "users").len(), 1);
    }

    #[tokio::test]
    async fn test_abort_discards_writes() {
        let (memory, client) = memory();
        let users = client.database("app").collection("users");
        let mut tx = TransactionalSession::new(client, TransactionMode::Enabled);

        tx.start().await.unwrap();
        tx.begin().await.unwrap();
        users.insert_one(tx.session(), Document::new()).await.unwrap();
        tx.abort().await.unwrap();

        assert!(memory.documents("app", "users").is_empty());
        assert!(tx.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_mode_never_touches_driver() {
        let (memory, client) = memory();
        memory.fail_once(FailPoint::StartSession);
        memory.fail_once(FailPoint::BeginTransaction);
        let users = client.database("app").collection("users");
        let mut tx = TransactionalSession::new(client, TransactionMode::Disabled);

        tx.start().await.unwrap();
        tx.begin().await.unwrap();
        assert!(tx.session().is_none());
        users.insert_one(tx.session(), Document::new()).await.unwrap();
        tx.abort().await.unwrap();
        tx.commit().await.unwrap();

        // Written directly, so the abort had nothing to discard.
        assert_eq!(memory.documents("app", "users").len(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (_, client) = memory();
        let mut tx = TransactionalSession::new(client, TransactionMode::Enabled);

        tx.start().await.unwrap();
        assert!(tx.start().await.is_err());
    }
}
