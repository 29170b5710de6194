//! In-memory document backend.
//!
//! Behaves like a single MongoDB replica set: sessions can open transactions
//! whose writes are staged and only become visible on commit. Aborting or
//! dropping the session discards them. Fail points let tests make individual
//! driver calls fail once.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use super::core::{
    document_id, Document, DocumentClient, DocumentCollection, DocumentDatabase, DocumentSession,
    Filter, FindOptions, UpsertOutcome, ID_FIELD,
};
use super::{DriverError, DriverResult};

const BACKEND: &str = "memory";

type CollectionKey = (String, String);

/// A driver call that can be made to fail once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailPoint {
    StartSession,
    BeginTransaction,
    CommitTransaction,
    AbortTransaction,
    Find { collection: String },
    Insert { collection: String },
    Upsert { collection: String },
    Update { collection: String },
    Delete { collection: String },
}

impl FailPoint {
    fn describe(&self) -> String {
        match self {
            FailPoint::StartSession => "start session".to_string(),
            FailPoint::BeginTransaction => "begin transaction".to_string(),
            FailPoint::CommitTransaction => "commit transaction".to_string(),
            FailPoint::AbortTransaction => "abort transaction".to_string(),
            FailPoint::Find { collection } => format!("find on {}", collection),
            FailPoint::Insert { collection } => format!("insert into {}", collection),
            FailPoint::Upsert { collection } => format!("upsert into {}", collection),
            FailPoint::Update { collection } => format!("update of {}", collection),
            FailPoint::Delete { collection } => format!("delete from {}", collection),
        }
    }
}

#[derive(Debug, Clone)]
enum WriteOp {
    Insert(Document),
    Update { filter: Filter, update: Document },
    Delete { filter: Filter },
}

#[derive(Debug, Clone)]
struct StagedWrite {
    key: CollectionKey,
    op: WriteOp,
}

#[derive(Default)]
struct MemoryStore {
    collections: Mutex<HashMap<CollectionKey, Vec<Document>>>,
    fail_points: Mutex<Vec<FailPoint>>,
    supports_transactions: bool,
    writes: AtomicU64,
    next_session: AtomicU64,
}

impl MemoryStore {
    fn check(&self, point: FailPoint) -> DriverResult<()> {
        let mut fail_points = self.fail_points.lock();
        if let Some(index) = fail_points.iter().position(|p| *p == point) {
            fail_points.remove(index);
            return Err(DriverError::Injected(point.describe()));
        }
        Ok(())
    }

    fn snapshot(&self, key: &CollectionKey) -> Vec<Document> {
        self.collections.lock().get(key).cloned().unwrap_or_default()
    }

    fn write(&self, key: CollectionKey, op: WriteOp) -> DriverResult<u64> {
        let mut collections = self.collections.lock();
        let documents = collections.entry(key.clone()).or_default();
        let affected = apply_write(documents, &key.1, &op)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(affected)
    }

    fn commit(&self, staged: Vec<StagedWrite>) -> DriverResult<()> {
        let mut collections = self.collections.lock();

        // Apply to copies first so a failing write leaves the store untouched.
        let mut touched: HashMap<CollectionKey, Vec<Document>> = HashMap::new();
        for write in &staged {
            let documents = touched
                .entry(write.key.clone())
                .or_insert_with(|| collections.get(&write.key).cloned().unwrap_or_default());
            apply_write(documents, &write.key.1, &write.op)?;
        }

        for (key, documents) in touched {
            collections.insert(key, documents);
        }
        self.writes.fetch_add(staged.len() as u64, Ordering::SeqCst);
        Ok(())
    }
}

fn apply_write(documents: &mut Vec<Document>, collection: &str, op: &WriteOp) -> DriverResult<u64> {
    match op {
        WriteOp::Insert(document) => {
            let id = document_id(document).unwrap_or_default();
            if documents.iter().any(|existing| document_id(existing) == Some(id)) {
                return Err(DriverError::DuplicateKey {
                    collection: collection.to_string(),
                    key: id.to_string(),
                });
            }
            documents.push(document.clone());
            Ok(1)
        }
        WriteOp::Update { filter, update } => {
            match documents.iter_mut().find(|existing| filter.matches(existing)) {
                Some(existing) => {
                    merge_fields(existing, update);
                    Ok(1)
                }
                None => Ok(0),
            }
        }
        WriteOp::Delete { filter } => {
            let before = documents.len();
            documents.retain(|existing| !filter.matches(existing));
            Ok((before - documents.len()) as u64)
        }
    }
}

fn merge_fields(target: &mut Document, update: &Document) {
    for (field, value) in update {
        if field != ID_FIELD {
            target.insert(field.clone(), value.clone());
        }
    }
}

fn with_generated_id(mut document: Document) -> (String, Document) {
    let id = match document_id(&document) {
        Some(id) => id.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            document.insert(ID_FIELD.to_string(), JsonValue::String(id.clone()));
            id
        }
    };
    (id, document)
}

/// In-process document database client
#[derive(Clone)]
pub struct MemoryClient {
    store: Arc<MemoryStore>,
}

impl MemoryClient {
    /// Create an empty store that supports transactions
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore {
                supports_transactions: true,
                ..Default::default()
            }),
        }
    }

    /// Create an empty store that rejects transactions, like a standalone server
    pub fn without_transaction_support() -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
        }
    }

    /// Make the next matching driver call fail
    pub fn fail_once(&self, point: FailPoint) {
        self.store.fail_points.lock().push(point);
    }

    /// Committed contents of a collection
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.store
            .snapshot(&(database.to_string(), collection.to_string()))
    }

    /// Number of write operations that reached the store
    pub fn write_count(&self) -> u64 {
        self.store.writes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentClient for MemoryClient {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn database(&self, name: &str) -> Arc<dyn DocumentDatabase> {
        Arc::new(MemoryDatabase {
            store: self.store.clone(),
            name: name.to_string(),
        })
    }

    async fn start_session(&self) -> DriverResult<Box<dyn DocumentSession>> {
        self.store.check(FailPoint::StartSession)?;
        let id = self.store.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(session = id, "Started memory session");
        Ok(Box::new(MemorySession {
            id,
            store: self.store.clone(),
            staged: None,
        }))
    }
}

struct MemoryDatabase {
    store: Arc<MemoryStore>,
    name: String,
}

impl DocumentDatabase for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        Arc::new(MemoryCollection {
            store: self.store.clone(),
            key: (self.name.clone(), name.to_string()),
        })
    }
}

/// Session over the in-memory store
pub struct MemorySession {
    id: u64,
    store: Arc<MemoryStore>,
    staged: Option<Vec<StagedWrite>>,
}

impl MemorySession {
    fn view(&self, key: &CollectionKey) -> DriverResult<Vec<Document>> {
        let mut documents = self.store.snapshot(key);
        if let Some(staged) = &self.staged {
            for write in staged.iter().filter(|write| &write.key == key) {
                apply_write(&mut documents, &key.1, &write.op)?;
            }
        }
        Ok(documents)
    }
}

#[async_trait]
impl DocumentSession for MemorySession {
    async fn begin_transaction(&mut self) -> DriverResult<()> {
        self.store.check(FailPoint::BeginTransaction)?;
        if !self.store.supports_transactions {
            return Err(DriverError::Transaction(
                "Transaction numbers are only allowed on a replica set member or mongos"
                    .to_string(),
            ));
        }
        if self.staged.is_some() {
            return Err(DriverError::Transaction(
                "Transaction already in progress".to_string(),
            ));
        }
        self.staged = Some(Vec::new());
        debug!(session = self.id, "Memory transaction started");
        Ok(())
    }

    async fn commit_transaction(&mut self) -> DriverResult<()> {
        self.store.check(FailPoint::CommitTransaction)?;
        let staged = self
            .staged
            .take()
            .ok_or_else(|| DriverError::Transaction("No transaction started".to_string()))?;
        debug!(session = self.id, writes = staged.len(), "Committing memory transaction");
        self.store.commit(staged)
    }

    async fn abort_transaction(&mut self) -> DriverResult<()> {
        self.store.check(FailPoint::AbortTransaction)?;
        match self.staged.take() {
            Some(staged) => {
                debug!(session = self.id, discarded = staged.len(), "Memory transaction aborted");
                Ok(())
            }
            None => Err(DriverError::Transaction(
                "No transaction started".to_string(),
            )),
        }
    }

    fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn downcast(session: &mut dyn DocumentSession) -> DriverResult<&mut MemorySession> {
    session
        .as_any_mut()
        .downcast_mut::<MemorySession>()
        .ok_or(DriverError::ForeignSession { expected: BACKEND })
}

struct MemoryCollection {
    store: Arc<MemoryStore>,
    key: CollectionKey,
}

impl MemoryCollection {
    fn point(&self, make: fn(String) -> FailPoint) -> FailPoint {
        make(self.key.1.clone())
    }

    fn read(&self, session: Option<&mut dyn DocumentSession>) -> DriverResult<Vec<Document>> {
        match session {
            Some(session) => downcast(session)?.view(&self.key),
            None => Ok(self.store.snapshot(&self.key)),
        }
    }

    /// Stage the write on an open transaction, or apply it directly
    fn write(&self, session: Option<&mut dyn DocumentSession>, op: WriteOp) -> DriverResult<u64> {
        if let Some(session) = session {
            let session = downcast(session)?;
            if session.staged.is_some() {
                let mut view = session.view(&self.key)?;
                let affected = apply_write(&mut view, &self.key.1, &op)?;
                if let Some(staged) = session.staged.as_mut() {
                    staged.push(StagedWrite {
                        key: self.key.clone(),
                        op,
                    });
                }
                return Ok(affected);
            }
        }
        self.store.write(self.key.clone(), op)
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.key.1
    }

    async fn find(
        &self,
        session: Option<&mut dyn DocumentSession>,
        filter: &Filter,
        options: &FindOptions,
    ) -> DriverResult<Vec<Document>> {
        self.store
            .check(self.point(|collection| FailPoint::Find { collection }))?;
        let matching = self
            .read(session)?
            .into_iter()
            .filter(|document| filter.matches(document))
            .collect();
        Ok(options.apply(matching))
    }

    async fn insert_one(
        &self,
        session: Option<&mut dyn DocumentSession>,
        document: Document,
    ) -> DriverResult<String> {
        self.store
            .check(self.point(|collection| FailPoint::Insert { collection }))?;
        let (id, document) = with_generated_id(document);
        self.write(session, WriteOp::Insert(document))?;
        Ok(id)
    }

    async fn upsert(
        &self,
        mut session: Option<&mut dyn DocumentSession>,
        filter: &Filter,
        update: Document,
    ) -> DriverResult<UpsertOutcome> {
        self.store
            .check(self.point(|collection| FailPoint::Upsert { collection }))?;

        // Resolve against the session's view so the staged write is deterministic.
        let visible = match session.as_mut() {
            Some(session) => downcast(&mut **session)?.view(&self.key)?,
            None => self.store.snapshot(&self.key),
        };
        let existing = visible.into_iter().find(|document| filter.matches(document));

        match existing.as_ref().and_then(document_id) {
            Some(id) => {
                let op = WriteOp::Update {
                    filter: Filter::eq(ID_FIELD, id),
                    update,
                };
                self.write(session, op)?;
                Ok(UpsertOutcome {
                    matched_count: 1,
                    upserted_id: None,
                })
            }
            None => {
                let mut document = filter.equality_fields();
                merge_fields(&mut document, &update);
                let (id, document) = with_generated_id(document);
                self.write(session, WriteOp::Insert(document))?;
                Ok(UpsertOutcome {
                    matched_count: 0,
                    upserted_id: Some(id),
                })
            }
        }
    }

    async fn update_one(
        &self,
        session: Option<&mut dyn DocumentSession>,
        filter: &Filter,
        update: Document,
    ) -> DriverResult<u64> {
        self.store
            .check(self.point(|collection| FailPoint::Update { collection }))?;
        self.write(
            session,
            WriteOp::Update {
                filter: filter.clone(),
                update,
            },
        )
    }

    async fn delete_many(
        &self,
        session: Option<&mut dyn DocumentSession>,
        filter: &Filter,
    ) -> DriverResult<u64> {
        self.store
            .check(self.point(|collection| FailPoint::Delete { collection }))?;
        self.write(
            session,
            WriteOp::Delete {
                filter: filter.clone(),
            },
        )
    }
}
