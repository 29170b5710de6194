//! MongoDB backend built on the official driver.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mongodb::options::{FindOptions as MongoFindOptions, UpdateOptions};
use mongodb::{Client, ClientSession, Collection};
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use super::core::{
    document_id, Document, DocumentClient, DocumentCollection, DocumentDatabase, DocumentSession,
    Filter, FindOptions, SortOrder, UpsertOutcome, ID_FIELD,
};
use super::{DriverError, DriverResult};

const BACKEND: &str = "mongodb";

/// Client backed by a MongoDB deployment
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
}

impl MongoClient {
    /// Connect using a MongoDB connection string
    pub async fn connect(uri: &str) -> DriverResult<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing driver client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentClient for MongoClient {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn database(&self, name: &str) -> Arc<dyn DocumentDatabase> {
        Arc::new(MongoDatabase {
            database: self.client.database(name),
        })
    }

    async fn start_session(&self) -> DriverResult<Box<dyn DocumentSession>> {
        let session = self
            .client
            .start_session(None)
            .await
            .map_err(|e| DriverError::Session(e.to_string()))?;
        Ok(Box::new(MongoSession {
            session,
            in_transaction: false,
        }))
    }
}

struct MongoDatabase {
    database: mongodb::Database,
}

impl DocumentDatabase for MongoDatabase {
    fn name(&self) -> &str {
        self.database.name()
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        Arc::new(MongoCollection {
            collection: self.database.collection::<BsonDocument>(name),
        })
    }
}

/// Driver session wrapper
pub struct MongoSession {
    session: ClientSession,
    in_transaction: bool,
}

#[async_trait]
impl DocumentSession for MongoSession {
    async fn begin_transaction(&mut self) -> DriverResult<()> {
        self.session
            .start_transaction(None)
            .await
            .map_err(|e| DriverError::Transaction(e.to_string()))?;
        self.in_transaction = true;
        debug!("MongoDB transaction started");
        Ok(())
    }

    async fn commit_transaction(&mut self) -> DriverResult<()> {
        self.in_transaction = false;
        self.session
            .commit_transaction()
            .await
            .map_err(|e| DriverError::Transaction(e.to_string()))
    }

    async fn abort_transaction(&mut self) -> DriverResult<()> {
        self.in_transaction = false;
        self.session
            .abort_transaction()
            .await
            .map_err(|e| DriverError::Transaction(e.to_string()))
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn driver_session(session: &mut dyn DocumentSession) -> DriverResult<&mut ClientSession> {
    session
        .as_any_mut()
        .downcast_mut::<MongoSession>()
        .map(|wrapper| &mut wrapper.session)
        .ok_or(DriverError::ForeignSession { expected: BACKEND })
}

struct MongoCollection {
    collection: Collection<BsonDocument>,
}

impl MongoCollection {
    fn query_error(&self, err: mongodb::error::Error) -> DriverError {
        let message = err.to_string();
        if message.contains("E11000") {
            DriverError::DuplicateKey {
                collection: self.collection.name().to_string(),
                key: message,
            }
        } else {
            DriverError::Query(message)
        }
    }
}

#[async_trait]
impl DocumentCollection for MongoCollection {
    fn name(&self) -> &str {
        self.collection.name()
    }

    async fn find(
        &self,
        session: Option<&mut dyn DocumentSession>,
        filter: &Filter,
        options: &FindOptions,
    ) -> DriverResult<Vec<Document>> {
        let query = to_query(filter)?;
        let find_options = to_find_options(options);

        let raw: Vec<BsonDocument> = match session {
            Some(session) => {
                let session = driver_session(session)?;
                let mut cursor = self
                    .collection
                    .find_with_session(query, find_options, session)
                    .await
                    .map_err(|e| self.query_error(e))?;
                let mut documents = Vec::new();
                while let Some(document) = cursor.next(session).await {
                    documents.push(document.map_err(|e| self.query_error(e))?);
                }
                documents
            }
            None => self
                .collection
                .find(query, find_options)
                .await
                .map_err(|e| self.query_error(e))?
                .try_collect()
                .await
                .map_err(|e| self.query_error(e))?,
        };

        raw.into_iter().map(from_bson_document).collect()
    }

    async fn insert_one(
        &self,
        session: Option<&mut dyn DocumentSession>,
        mut document: Document,
    ) -> DriverResult<String> {
        let id = match document_id(&document) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                document.insert(ID_FIELD.to_string(), JsonValue::String(id.clone()));
                id
            }
        };
        let document = to_bson_document(&document)?;

        match session {
            Some(session) => {
                let session = driver_session(session)?;
                self.collection
                    .insert_one_with_session(document, None, session)
                    .await
            }
            None => self.collection.insert_one(document, None).await,
        }
        .map_err(|e| self.query_error(e))?;

        Ok(id)
    }

    async fn upsert(
        &self,
        session: Option<&mut dyn DocumentSession>,
        filter: &Filter,
        update: Document,
    ) -> DriverResult<UpsertOutcome> {
        let query = to_query(filter)?;
        let mut modifications = BsonDocument::new();
        modifications.insert("$set", to_bson_document(&update)?);
        // String ids keep documents readable through the JSON boundary.
        let mut on_insert = BsonDocument::new();
        on_insert.insert(ID_FIELD, Uuid::new_v4().to_string());
        modifications.insert("$setOnInsert", on_insert);

        let mut options = UpdateOptions::default();
        options.upsert = Some(true);

        let result = match session {
            Some(session) => {
                let session = driver_session(session)?;
                self.collection
                    .update_one_with_session(query, modifications, options, session)
                    .await
            }
            None => self.collection.update_one(query, modifications, options).await,
        }
        .map_err(|e| self.query_error(e))?;

        Ok(UpsertOutcome {
            matched_count: result.matched_count,
            upserted_id: result.upserted_id.map(|id| match id {
                Bson::String(id) => id,
                other => other.to_string(),
            }),
        })
    }

    async fn update_one(
        &self,
        session: Option<&mut dyn DocumentSession>,
        filter: &Filter,
        update: Document,
    ) -> DriverResult<u64> {
        let query = to_query(filter)?;
        let mut modifications = BsonDocument::new();
        modifications.insert("$set", to_bson_document(&update)?);

        let result = match session {
            Some(session) => {
                let session = driver_session(session)?;
                self.collection
                    .update_one_with_session(query, modifications, None, session)
                    .await
            }
            None => self.collection.update_one(query, modifications, None).await,
        }
        .map_err(|e| self.query_error(e))?;

        Ok(result.matched_count)
    }

    async fn delete_many(
        &self,
        session: Option<&mut dyn DocumentSession>,
        filter: &Filter,
    ) -> DriverResult<u64> {
        let query = to_query(filter)?;

        let result = match session {
            Some(session) => {
                let session = driver_session(session)?;
                self.collection
                    .delete_many_with_session(query, None, session)
                    .await
            }
            None => self.collection.delete_many(query, None).await,
        }
        .map_err(|e| self.query_error(e))?;

        Ok(result.deleted_count)
    }
}

fn to_bson(value: &JsonValue) -> DriverResult<Bson> {
    bson::to_bson(value).map_err(|e| DriverError::Serialization(e.to_string()))
}

fn to_bson_document(document: &Document) -> DriverResult<BsonDocument> {
    bson::to_document(document).map_err(|e| DriverError::Serialization(e.to_string()))
}

fn from_bson_document(document: BsonDocument) -> DriverResult<Document> {
    match Bson::Document(document).into_relaxed_extjson() {
        JsonValue::Object(map) => Ok(map),
        other => Err(DriverError::Serialization(format!(
            "expected a document, got {}",
            other
        ))),
    }
}

/// Translate a filter into a MongoDB query document
fn to_query(filter: &Filter) -> DriverResult<BsonDocument> {
    let mut query = BsonDocument::new();
    match filter {
        Filter::All => {}
        Filter::Eq(field, value) => {
            query.insert(field.clone(), to_bson(value)?);
        }
        Filter::In(field, values) => {
            let values = values.iter().map(to_bson).collect::<DriverResult<Vec<_>>>()?;
            let mut clause = BsonDocument::new();
            clause.insert("$in", values);
            query.insert(field.clone(), clause);
        }
        Filter::And(filters) => {
            let clauses = filters
                .iter()
                .map(|filter| to_query(filter).map(Bson::Document))
                .collect::<DriverResult<Vec<_>>>()?;
            query.insert("$and", clauses);
        }
    }
    Ok(query)
}

fn to_find_options(options: &FindOptions) -> MongoFindOptions {
    let mut find_options = MongoFindOptions::default();
    if let Some(sort) = &options.sort {
        let direction = match sort.order {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        };
        let mut sort_document = BsonDocument::new();
        sort_document.insert(sort.field.clone(), direction);
        find_options.sort = Some(sort_document);
    }
    find_options.limit = options.limit.map(|limit| limit as i64);
    find_options
}
