//! In-process document store.
//!
//! Backs local development (`STORE_BACKEND=memory`) and the test suites. It
//! evaluates the same [`Query`] predicates the Appwrite backend forwards, with
//! Appwrite's defaults (25-row page when no limit is given, insertion order).

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::{DashMap, DashSet};
use serde_json::Value;

use super::{unique_id, Document, DocumentList, DocumentStore, Query, StoreError};

const DEFAULT_PAGE: usize = 25;

#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<String, Vec<Document>>,
    failing_writes: DashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document as-is. Missing `$id` / `$createdAt` / `$updatedAt` are filled in.
    pub fn insert(&self, collection: &str, data: Value) -> Document {
        let mut doc = match data {
            Value::Object(map) => map,
            _ => Document::new(),
        };
        let now = now_iso();
        doc.entry("$id").or_insert_with(|| Value::String(unique_id()));
        doc.entry("$createdAt")
            .or_insert_with(|| Value::String(now.clone()));
        doc.entry("$updatedAt").or_insert_with(|| Value::String(now));
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());
        doc
    }

    /// Every document in a collection, in insertion order.
    pub fn all(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|docs| docs.clone())
            .unwrap_or_default()
    }

    /// Make every create/update/delete against `collection` fail until [`heal`](Self::heal).
    pub fn fail_writes(&self, collection: &str) {
        self.failing_writes.insert(collection.to_string());
    }

    pub fn heal(&self, collection: &str) {
        self.failing_writes.remove(collection);
    }

    fn check_writable(&self, collection: &str) -> Result<(), StoreError> {
        if self.failing_writes.contains(collection) {
            return Err(StoreError::Rejected {
                status: 503,
                message: format!("writes to {} are unavailable", collection),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list(&self, collection: &str, queries: &[Query]) -> Result<DocumentList, StoreError> {
        let docs = self.all(collection);

        let mut matched: Vec<Document> = docs
            .into_iter()
            .filter(|doc| queries.iter().all(|q| matches(doc, q)))
            .collect();

        for q in queries {
            match q {
                Query::OrderAsc(attr) => {
                    matched.sort_by(|a, b| order_by(a.get(attr), b.get(attr)))
                }
                Query::OrderDesc(attr) => {
                    matched.sort_by(|a, b| order_by(b.get(attr), a.get(attr)))
                }
                _ => {}
            }
        }

        let total = matched.len() as u64;
        let offset = queries
            .iter()
            .find_map(|q| match q {
                Query::Offset(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0);
        let limit = queries
            .iter()
            .find_map(|q| match q {
                Query::Limit(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(DEFAULT_PAGE);

        let documents = matched.into_iter().skip(offset).take(limit).collect();
        Ok(DocumentList { total, documents })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| doc_id(d) == Some(id)).cloned())
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
    }

    async fn create(&self, collection: &str, id: &str, data: Value) -> Result<Document, StoreError> {
        self.check_writable(collection)?;

        let exists = self
            .collections
            .get(collection)
            .map(|docs| docs.iter().any(|d| doc_id(d) == Some(id)))
            .unwrap_or(false);
        if exists {
            return Err(StoreError::Rejected {
                status: 409,
                message: format!("document {} already exists", id),
            });
        }

        let mut doc = match data {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::Rejected {
                    status: 400,
                    message: format!("document data must be an object, got {}", other),
                })
            }
        };
        let now = now_iso();
        doc.insert("$id".into(), Value::String(id.to_string()));
        doc.insert("$createdAt".into(), Value::String(now.clone()));
        doc.insert("$updatedAt".into(), Value::String(now));

        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());
        Ok(doc)
    }

    async fn update(&self, collection: &str, id: &str, data: Value) -> Result<Document, StoreError> {
        self.check_writable(collection)?;

        let not_found = || StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        };
        let mut docs = self.collections.get_mut(collection).ok_or_else(not_found)?;
        let doc = docs
            .iter_mut()
            .find(|d| doc_id(d) == Some(id))
            .ok_or_else(not_found)?;

        if let Value::Object(patch) = data {
            for (k, v) in patch {
                if !k.starts_with('$') {
                    doc.insert(k, v);
                }
            }
        }
        doc.insert("$updatedAt".into(), Value::String(now_iso()));
        Ok(doc.clone())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.check_writable(collection)?;

        let mut docs = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        let before = docs.len();
        docs.retain(|d| doc_id(d) != Some(id));
        if docs.len() == before {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn doc_id(doc: &Document) -> Option<&str> {
    doc.get("$id").and_then(Value::as_str)
}

fn matches(doc: &Document, query: &Query) -> bool {
    match query {
        Query::Equal(attr, values) => match doc.get(attr) {
            None | Some(Value::Null) => false,
            Some(Value::Array(items)) => items
                .iter()
                .any(|item| values.iter().any(|v| values_equal(item, v))),
            Some(field) => values.iter().any(|v| values_equal(field, v)),
        },
        Query::NotEqual(attr, v) => match doc.get(attr) {
            None | Some(Value::Null) => true,
            Some(field) => !values_equal(field, v),
        },
        Query::LessThan(attr, v) => cmp_field(doc, attr, v) == Some(Ordering::Less),
        Query::LessThanEqual(attr, v) => {
            matches!(cmp_field(doc, attr, v), Some(Ordering::Less | Ordering::Equal))
        }
        Query::GreaterThan(attr, v) => cmp_field(doc, attr, v) == Some(Ordering::Greater),
        Query::GreaterThanEqual(attr, v) => {
            matches!(cmp_field(doc, attr, v), Some(Ordering::Greater | Ordering::Equal))
        }
        Query::IsNotNull(attr) => !matches!(doc.get(attr), None | Some(Value::Null)),
        Query::OrderAsc(_) | Query::OrderDesc(_) | Query::Limit(_) | Query::Offset(_) => true,
    }
}

fn cmp_field(doc: &Document, attr: &str, v: &Value) -> Option<Ordering> {
    doc.get(attr).and_then(|field| compare(field, v))
}

/// Relationship attributes may be expanded into documents; compare on their `$id`.
fn values_equal(field: &Value, expected: &Value) -> bool {
    if let Some(id) = field.get("$id") {
        return id == expected;
    }
    match compare(field, expected) {
        Some(ord) => ord == Ordering::Equal,
        None => field == expected,
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_time(x), parse_time(y)) {
            (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn order_by(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
