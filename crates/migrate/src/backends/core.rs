//! Core Document Backend Traits
//!
//! This module defines the traits the migration engine consumes from a
//! document database driver. They abstract away the concrete driver so the
//! engine can run against MongoDB in production and the in-memory backend in
//! tests.

use std::any::Any;
use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::DriverResult;

/// A stored document: a JSON object keyed by field name
pub type Document = serde_json::Map<String, JsonValue>;

/// Field holding a document's primary key
pub const ID_FIELD: &str = "_id";

/// Abstract document database client
#[async_trait]
pub trait DocumentClient: Send + Sync {
    /// Short backend identifier used in logs and error messages
    fn backend_name(&self) -> &'static str;

    /// Get a handle to a named database
    fn database(&self, name: &str) -> Arc<dyn DocumentDatabase>;

    /// Start a new client session
    async fn start_session(&self) -> DriverResult<Box<dyn DocumentSession>>;
}

/// Handle to one logical database
pub trait DocumentDatabase: Send + Sync {
    fn name(&self) -> &str;

    /// Get a handle to a named collection
    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection>;
}

/// Handle to one collection.
///
/// Every operation takes an optional session; passing the session of an open
/// transaction makes the operation part of that transaction.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Find documents matching a filter
    async fn find(
        &self,
        session: Option<&mut dyn DocumentSession>,
        filter: &Filter,
        options: &FindOptions,
    ) -> DriverResult<Vec<Document>>;

    /// Insert a document, returning its `_id` (generated when absent)
    async fn insert_one(
        &self,
        session: Option<&mut dyn DocumentSession>,
        document: Document,
    ) -> DriverResult<String>;

    /// Set the given fields on the first matching document, inserting a new
    /// document built from the filter's equality fields when none matches
    async fn upsert(
        &self,
        session: Option<&mut dyn DocumentSession>,
        filter: &Filter,
        update: Document,
    ) -> DriverResult<UpsertOutcome>;

    /// Set the given fields on the first matching document, returning the match count
    async fn update_one(
        &self,
        session: Option<&mut dyn DocumentSession>,
        filter: &Filter,
        update: Document,
    ) -> DriverResult<u64>;

    /// Delete every matching document, returning the deleted count
    async fn delete_many(
        &self,
        session: Option<&mut dyn DocumentSession>,
        filter: &Filter,
    ) -> DriverResult<u64>;
}

/// Abstract client session with transaction control
#[async_trait]
pub trait DocumentSession: Send {
    async fn begin_transaction(&mut self) -> DriverResult<()>;

    async fn commit_transaction(&mut self) -> DriverResult<()>;

    async fn abort_transaction(&mut self) -> DriverResult<()>;

    /// Whether a transaction is currently open on this session
    fn in_transaction(&self) -> bool;

    /// Lets a backend recover its concrete session type
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Outcome of an upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub matched_count: u64,
    /// Set when no document matched and a new one was inserted
    pub upserted_id: Option<String>,
}

/// Document filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document
    All,
    /// Field equals value
    Eq(String, JsonValue),
    /// Field equals one of the values
    In(String, Vec<JsonValue>),
    /// Every nested filter matches
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        Filter::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    /// Combine with another filter, flattening nested conjunctions
    pub fn and(self, other: Filter) -> Self {
        let mut parts = match self {
            Filter::All => Vec::new(),
            Filter::And(parts) => parts,
            single => vec![single],
        };

        match other {
            Filter::All => {}
            Filter::And(more) => parts.extend(more),
            single => parts.push(single),
        }

        match parts.len() {
            0 => Filter::All,
            1 => parts.remove(0),
            _ => Filter::And(parts),
        }
    }

    /// Evaluate the filter against a document
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => document
                .get(field)
                .map_or(expected.is_null(), |actual| values_equal(actual, expected)),
            Filter::In(field, candidates) => {
                let actual = document.get(field).unwrap_or(&JsonValue::Null);
                candidates.iter().any(|candidate| values_equal(actual, candidate))
            }
            Filter::And(filters) => filters.iter().all(|filter| filter.matches(document)),
        }
    }

    /// Fields pinned by equality, used to seed documents created by an upsert
    pub fn equality_fields(&self) -> Document {
        let mut fields = Document::new();
        self.collect_equality_fields(&mut fields);
        fields
    }

    fn collect_equality_fields(&self, fields: &mut Document) {
        match self {
            Filter::Eq(field, value) => {
                fields.insert(field.clone(), value.clone());
            }
            Filter::And(filters) => {
                for filter in filters {
                    filter.collect_equality_fields(fields);
                }
            }
            Filter::All | Filter::In(..) => {}
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

/// Options for [`DocumentCollection::find`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Option<SortSpec>,
    pub limit: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(SortSpec {
            field: field.into(),
            order,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sort and truncate an in-memory result set according to these options
    pub fn apply(&self, mut documents: Vec<Document>) -> Vec<Document> {
        if let Some(sort) = &self.sort {
            documents.sort_by(|a, b| {
                let left = a.get(&sort.field).unwrap_or(&JsonValue::Null);
                let right = b.get(&sort.field).unwrap_or(&JsonValue::Null);
                let ordering = compare_values(left, right);
                match sort.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            documents.truncate(limit as usize);
        }

        documents
    }
}

/// Equality that treats `1` and `1.0` as the same number
pub fn values_equal(left: &JsonValue, right: &JsonValue) -> bool {
    match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => left == right,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object
pub fn compare_values(left: &JsonValue, right: &JsonValue) -> Ordering {
    fn rank(value: &JsonValue) -> u8 {
        match value {
            JsonValue::Null => 0,
            JsonValue::Bool(_) => 1,
            JsonValue::Number(_) => 2,
            JsonValue::String(_) => 3,
            JsonValue::Array(_) => 4,
            JsonValue::Object(_) => 5,
        }
    }

    match (left, right) {
        (JsonValue::Bool(a), JsonValue::Bool(b)) => a.cmp(b),
        (JsonValue::Number(a), JsonValue::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => a
                .as_f64()
                .unwrap_or(f64::NAN)
                .partial_cmp(&b.as_f64().unwrap_or(f64::NAN))
                .unwrap_or(Ordering::Equal),
        },
        (JsonValue::String(a), JsonValue::String(b)) => a.cmp(b),
        (JsonValue::Array(a), JsonValue::Array(b)) => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| compare_values(x, y))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        _ => rank(left).cmp(&rank(right)),
    }
}

/// Read a document's `_id` as a string
pub fn document_id(document: &Document) -> Option<&str> {
    document.get(ID_FIELD).and_then(JsonValue::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: JsonValue) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_filter_matching() {
        let record = doc(json!({"namespace": "billing", "migration_id": 2, "status": "Failure"}));

        assert!(Filter::All.matches(&record));
        assert!(Filter::eq("namespace", "billing").matches(&record));
        assert!(Filter::eq("migration_id", 2.0).matches(&record));
        assert!(!Filter::eq("namespace", "tenants").matches(&record));
        assert!(Filter::is_in("status", ["Running", "Failure"]).matches(&record));
        assert!(Filter::eq("error_detail", JsonValue::Null).matches(&record));

        let combined = Filter::eq("namespace", "billing").and(Filter::eq("migration_id", 3));
        assert!(!combined.matches(&record));
    }

    #[test]
    fn test_filter_and_flattens() {
        let filter = Filter::All
            .and(Filter::eq("a", 1))
            .and(Filter::eq("b", 2).and(Filter::eq("c", 3)));

        match filter {
            Filter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected conjunction, got {:?}", other),
        }

        assert_eq!(Filter::All.and(Filter::All), Filter::All);
        assert_eq!(Filter::All.and(Filter::eq("a", 1)), Filter::eq("a", 1));
    }

    #[test]
    fn test_equality_fields_skip_in_clauses() {
        let filter = Filter::eq("module_namespace", "ns")
            .and(Filter::eq("migration_id", 7))
            .and(Filter::is_in("status", ["Running", "Failure"]));

        let fields = filter.equality_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["migration_id"], json!(7));
        assert!(!fields.contains_key("status"));
    }

    #[test]
    fn test_find_options_sort_and_limit() {
        let documents = vec![
            doc(json!({"migration_id": 3})),
            doc(json!({"migration_id": 1})),
            doc(json!({"migration_id": 10})),
        ];

        let top = FindOptions::new()
            .sort_by("migration_id", SortOrder::Descending)
            .limit(1)
            .apply(documents.clone());
        assert_eq!(top[0]["migration_id"], json!(10));
        assert_eq!(top.len(), 1);

        let ascending = FindOptions::new()
            .sort_by("migration_id", SortOrder::Ascending)
            .apply(documents);
        let ids: Vec<_> = ascending.iter().map(|d| d["migration_id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(3), json!(10)]);
    }

    #[test]
    fn test_compare_values_mixed_types() {
        assert_eq!(compare_values(&json!(null), &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&json!(2), &json!(2.5)), Ordering::Less);
    }
}
