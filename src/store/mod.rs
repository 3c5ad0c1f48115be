//! Document store collaborator.
//!
//! Every collection the service touches lives behind [`DocumentStore`]: a
//! list/get/create/update/delete contract over untyped JSON documents with
//! Appwrite-style query predicates. Callers decode documents into typed
//! records (see `crate::models`) before doing any arithmetic on them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod appwrite;
pub mod memory;

/// A raw document as returned by the store, including `$`-prefixed system
/// attributes (`$id`, `$createdAt`, `$updatedAt`).
pub type Document = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {id} not found in {collection}")]
    NotFound { collection: String, id: String },

    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("store transport error: {0}")]
    Transport(String),

    #[error("failed to decode store response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// A create hit an existing document id.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Rejected { status: 409, .. })
    }
}

/// A page of documents plus the total number of matches before pagination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentList {
    pub total: u64,
    pub documents: Vec<Document>,
}

/// Query predicates understood by every backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Attribute equals any of the given values.
    Equal(String, Vec<Value>),
    NotEqual(String, Value),
    LessThan(String, Value),
    LessThanEqual(String, Value),
    GreaterThan(String, Value),
    GreaterThanEqual(String, Value),
    IsNotNull(String),
    OrderAsc(String),
    OrderDesc(String),
    Limit(usize),
    Offset(usize),
}

impl Query {
    pub fn equal(attribute: &str, value: impl Into<Value>) -> Self {
        Query::Equal(attribute.to_string(), vec![value.into()])
    }

    pub fn equal_any<V: Into<Value>>(attribute: &str, values: impl IntoIterator<Item = V>) -> Self {
        Query::Equal(
            attribute.to_string(),
            values.into_iter().map(Into::into).collect(),
        )
    }

    pub fn less_than(attribute: &str, value: impl Into<Value>) -> Self {
        Query::LessThan(attribute.to_string(), value.into())
    }

    pub fn less_than_equal(attribute: &str, value: impl Into<Value>) -> Self {
        Query::LessThanEqual(attribute.to_string(), value.into())
    }

    pub fn greater_than(attribute: &str, value: impl Into<Value>) -> Self {
        Query::GreaterThan(attribute.to_string(), value.into())
    }

    pub fn greater_than_equal(attribute: &str, value: impl Into<Value>) -> Self {
        Query::GreaterThanEqual(attribute.to_string(), value.into())
    }

    pub fn order_asc(attribute: &str) -> Self {
        Query::OrderAsc(attribute.to_string())
    }

    pub fn order_desc(attribute: &str) -> Self {
        Query::OrderDesc(attribute.to_string())
    }

    pub fn limit(n: usize) -> Self {
        Query::Limit(n)
    }

    pub fn offset(n: usize) -> Self {
        Query::Offset(n)
    }

    /// Appwrite's JSON query syntax (`{"method": ..., "attribute": ..., "values": [...]}`).
    pub fn to_appwrite(&self) -> Value {
        use serde_json::json;
        match self {
            Query::Equal(attr, values) => {
                json!({ "method": "equal", "attribute": attr, "values": values })
            }
            Query::NotEqual(attr, v) => {
                json!({ "method": "notEqual", "attribute": attr, "values": [v] })
            }
            Query::LessThan(attr, v) => {
                json!({ "method": "lessThan", "attribute": attr, "values": [v] })
            }
            Query::LessThanEqual(attr, v) => {
                json!({ "method": "lessThanEqual", "attribute": attr, "values": [v] })
            }
            Query::GreaterThan(attr, v) => {
                json!({ "method": "greaterThan", "attribute": attr, "values": [v] })
            }
            Query::GreaterThanEqual(attr, v) => {
                json!({ "method": "greaterThanEqual", "attribute": attr, "values": [v] })
            }
            Query::IsNotNull(attr) => json!({ "method": "isNotNull", "attribute": attr }),
            Query::OrderAsc(attr) => json!({ "method": "orderAsc", "attribute": attr }),
            Query::OrderDesc(attr) => json!({ "method": "orderDesc", "attribute": attr }),
            Query::Limit(n) => json!({ "method": "limit", "values": [n] }),
            Query::Offset(n) => json!({ "method": "offset", "values": [n] }),
        }
    }
}

/// The collaborator contract: a document database accessed through
/// list/get/create/update/delete with query filters and pagination.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list(&self, collection: &str, queries: &[Query]) -> Result<DocumentList, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError>;

    async fn create(&self, collection: &str, id: &str, data: Value) -> Result<Document, StoreError>;

    /// Partial update: only the attributes present in `data` change.
    async fn update(&self, collection: &str, id: &str, data: Value) -> Result<Document, StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;
}

/// Generate a store-compatible document id (36 chars max, `[a-z0-9]`).
pub fn unique_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Fetch up to `cap` documents, following offset pagination in pages of
/// `page_size`. Used where a bounded "broad fetch" is acceptable.
pub async fn list_capped(
    store: &dyn DocumentStore,
    collection: &str,
    filters: &[Query],
    cap: usize,
    page_size: usize,
) -> Result<Vec<Document>, StoreError> {
    let page_size = page_size.max(1);
    let mut out = Vec::new();
    let mut offset = 0usize;

    while out.len() < cap {
        let want = page_size.min(cap - out.len());
        let mut queries = filters.to_vec();
        queries.push(Query::limit(want));
        queries.push(Query::offset(offset));

        let page = store.list(collection, &queries).await?;
        let got = page.documents.len();
        out.extend(page.documents);
        offset += got;

        if got < want || (offset as u64) >= page.total {
            break;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_query_serializes_all_values() {
        let q = Query::equal_any("residencial_id", ["a", "b"]);
        let v = q.to_appwrite();
        assert_eq!(v["method"], "equal");
        assert_eq!(v["attribute"], "residencial_id");
        assert_eq!(v["values"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_limit_query_has_no_attribute() {
        let v = Query::limit(25).to_appwrite();
        assert_eq!(v["method"], "limit");
        assert_eq!(v["values"][0], 25);
        assert!(v.get("attribute").is_none());
    }

    #[test]
    fn test_unique_id_shape() {
        let id = unique_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
