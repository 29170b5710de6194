//! Execution context handed to migration bodies.

use std::sync::Arc;

use uuid::Uuid;

use crate::backends::{
    Document, DocumentClient, DocumentCollection, DocumentDatabase, DocumentSession, DriverResult,
    Filter, FindOptions, UpsertOutcome,
};
use crate::transaction::TransactionalSession;

/// Access to the database and the session a migration runs under.
///
/// The collection helpers pass the bound session automatically, so their
/// writes commit or abort together with the migration.
pub struct MigrationContext<'a> {
    client: &'a Arc<dyn DocumentClient>,
    database: Arc<dyn DocumentDatabase>,
    namespace: &'a str,
    batch_id: Uuid,
    session: &'a mut TransactionalSession,
}

impl<'a> MigrationContext<'a> {
    pub fn new(
        client: &'a Arc<dyn DocumentClient>,
        database: Arc<dyn DocumentDatabase>,
        namespace: &'a str,
        batch_id: Uuid,
        session: &'a mut TransactionalSession,
    ) -> Self {
        Self {
            client,
            database,
            namespace,
            batch_id,
            session,
        }
    }

    pub fn client(&self) -> &Arc<dyn DocumentClient> {
        self.client
    }

    pub fn database(&self) -> &Arc<dyn DocumentDatabase> {
        &self.database
    }

    pub fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        self.database.collection(name)
    }

    pub fn namespace(&self) -> &str {
        self.namespace
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// The bound driver session; `None` when transactions are disabled
    pub fn session(&mut self) -> Option<&mut dyn DocumentSession> {
        self.session.session()
    }

    pub async fn insert_one(&mut self, collection: &str, document: Document) -> DriverResult<String> {
        let collection = self.collection(collection);
        collection.insert_one(self.session(), document).await
    }

    pub async fn find(
        &mut self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> DriverResult<Vec<Document>> {
        let collection = self.collection(collection);
        collection.find(self.session(), filter, options).await
    }

    pub async fn upsert(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: Document,
    ) -> DriverResult<UpsertOutcome> {
        let collection = self.collection(collection);
        collection.upsert(self.session(), filter, update).await
    }

    pub async fn update_one(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: Document,
    ) -> DriverResult<u64> {
        let collection = self.collection(collection);
        collection.update_one(self.session(), filter, update).await
    }

    pub async fn delete_many(&mut self, collection: &str, filter: &Filter) -> DriverResult<u64> {
        let collection = self.collection(collection);
        collection.delete_many(self.session(), filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryClient;
    use serde_json::json;
    use tidemark_core::TransactionMode;

    #[tokio::test]
    async fn test_helpers_write_through_bound_session() {
        let memory = MemoryClient::new();
        let client: Arc<dyn DocumentClient> = Arc::new(memory.clone());
        let mut tx = TransactionalSession::new(client.clone(), TransactionMode::Enabled);
        tx.start().await.unwrap();
        tx.begin().await.unwrap();

        {
            let mut ctx =
                MigrationContext::new(&client, client.database("app"), "billing", Uuid::nil(), &mut tx);
            let document = json!({"plan": "pro"}).as_object().cloned().unwrap();
            ctx.insert_one("plans", document).await.unwrap();

            let seen = ctx
                .find("plans", &Filter::eq("plan", "pro"), &FindOptions::new())
                .await
                .unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(ctx.namespace(), "billing");
            assert!(ctx.session().is_some());
        }

        assert!(memory.documents("app", "plans").is_empty());
        tx.commit().await.unwrap();
        assert_eq!(memory.documents("app", "plans").len(), 1);
    }

    #[tokio::test]
    async fn test_no_session_when_transactions_disabled() {
        let memory = MemoryClient::new();
        let client: Arc<dyn DocumentClient> = Arc::new(memory.clone());
        let mut tx = TransactionalSession::new(client.clone(), TransactionMode::Disabled);
        tx.start().await.unwrap();

        let mut ctx = MigrationContext::new(&client, client.database("app"), "", Uuid::nil(), &mut tx);
        assert!(ctx.session().is_none());
        ctx.insert_one("plans", Document::new()).await.unwrap();

        assert_eq!(memory.documents("app", "plans").len(), 1);
    }
}
