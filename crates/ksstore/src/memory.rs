//! In-memory storage implementation.
//!
//! `MemoryStore` mirrors the Firestore store's semantics (merge-upsert,
//! return-old-value delete, term modes) without a network. Handles created
//! with [`MemoryStore::with_table`] share one [`MemoryBackend`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use ksstore_core::{resolve_id, Op, Record, Result, StoreError, Term, ID_FIELD};
use parking_lot::RwLock;
use serde_json::Value;

use crate::config::TermMode;
use crate::query::{self, Predicate};
use crate::Storer;

/// Shared table storage behind one or more [`MemoryStore`] handles.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, BTreeMap<String, Record>>>,
}

impl MemoryBackend {
    /// Number of records in `table`.
    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, BTreeMap::len)
    }

    /// Whether `table` holds no records.
    #[must_use]
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

/// In-memory record store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    table: String,
    backend: Arc<MemoryBackend>,
    term_mode: TermMode,
}

impl MemoryStore {
    /// Create an empty store with no table selected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store using the given term mode.
    #[must_use]
    pub fn with_term_mode(term_mode: TermMode) -> Self {
        Self {
            term_mode,
            ..Self::default()
        }
    }

    /// A new handle on `table` sharing this store's backend.
    #[must_use]
    pub fn with_table(&self, table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            backend: Arc::clone(&self.backend),
            term_mode: self.term_mode,
        }
    }
}

#[async_trait]
impl Storer for MemoryStore {
    type Client = MemoryBackend;

    fn client(&self) -> &MemoryBackend {
        &self.backend
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn set_table(&mut self, table: &str) {
        self.table = table.to_string();
    }

    async fn get(&self, id: &str) -> Result<Record> {
        self.backend
            .tables
            .read()
            .get(&self.table)
            .and_then(|records| records.get(id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn set_record(&self, id: &str, mut record: Record) -> Result<Record> {
        let id = resolve_id(id);
        record.insert(ID_FIELD.to_string(), Value::String(id.clone()));

        let stored = {
            let mut tables = self.backend.tables.write();
            let existing = tables
                .entry(self.table.clone())
                .or_default()
                .entry(id.clone())
                .or_default();
            merge(existing, record);
            existing.clone()
        };

        tracing::debug!(table = %self.table, id = %id, "Merged record");
        Ok(stored)
    }

    async fn all(&self) -> Result<Vec<Record>> {
        Ok(self
            .backend
            .tables
            .read()
            .get(&self.table)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn query(&self, terms: &[Term]) -> Result<Vec<Record>> {
        let predicates = query::predicates(terms, self.term_mode)?;

        Ok(self
            .backend
            .tables
            .read()
            .get(&self.table)
            .map(|records| {
                records
                    .values()
                    .filter(|record| predicates.iter().all(|p| matches(record, p)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, id: &str) -> Result<Record> {
        self.backend
            .tables
            .write()
            .get_mut(&self.table)
            .and_then(|records| records.remove(id))
            .ok_or(StoreError::NotFound)
    }
}

/// Merge `patch` into `target`, descending into objects present on both
/// sides. An empty object in `patch` replaces the target value.
fn merge(target: &mut Record, patch: Record) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) if !nested.is_empty() => {
                merge(existing, nested);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

fn lookup<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Equality with numbers compared by value, so `1 == 1.0`.
fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| equal(x, y))
        }
        _ => a == b,
    }
}

/// Ordering between values of the same kind; `None` across kinds.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(haystack: &[Value], needle: &Value) -> bool {
    haystack.iter().any(|v| equal(v, needle))
}

fn matches(record: &Record, predicate: &Predicate<'_>) -> bool {
    let Some(field) = lookup(record, predicate.field) else {
        return false;
    };
    let value = predicate.value;
    let candidates = value.as_array().map_or(&[][..], Vec::as_slice);

    match predicate.op {
        Op::Eq => equal(field, value),
        Op::NotEq => !field.is_null() && !equal(field, value),
        Op::Lt => compare(field, value) == Some(Ordering::Less),
        Op::Lte => matches!(compare(field, value), Some(Ordering::Less | Ordering::Equal)),
        Op::Gt => compare(field, value) == Some(Ordering::Greater),
        Op::Gte => matches!(
            compare(field, value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Op::ArrayContains => field.as_array().is_some_and(|items| contains(items, value)),
        Op::ArrayContainsAny => field
            .as_array()
            .is_some_and(|items| candidates.iter().any(|c| contains(items, c))),
        Op::In => contains(candidates, field),
        Op::NotIn => !field.is_null() && !contains(candidates, field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    async fn seeded(term_mode: TermMode) -> MemoryStore {
        let store = MemoryStore::with_term_mode(term_mode).with_table("items");
        store
            .set("a1", &json!({"a": 1, "b": 1, "tags": ["x", "y"], "n": 1.5}))
            .await
            .unwrap();
        store
            .set("a2", &json!({"a": 1, "b": 2, "tags": ["z"], "n": 3}))
            .await
            .unwrap();
        store
            .set("a3", &json!({"a": 2, "b": 2, "tags": [], "n": null}))
            .await
            .unwrap();
        store
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records
            .iter()
            .filter_map(|r| r.get(ID_FIELD).and_then(Value::as_str))
            .collect()
    }

    #[tokio::test]
    async fn record_crud() {
        let store = MemoryStore::new().with_table("users");

        let created = store.set("", &json!({"name": "Ada"})).await.unwrap();
        let id = created[ID_FIELD].as_str().unwrap().to_string();
        assert_eq!(created["name"], json!("Ada"));

        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched, created);

        let removed = store.delete(&id).await.unwrap();
        assert_eq!(removed, created);
        assert_eq!(store.get(&id).await, Err(StoreError::NotFound));
        assert_eq!(store.delete(&id).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn set_merges_nested_fields() {
        let store = MemoryStore::new().with_table("users");
        store
            .set(
                "u1",
                &json!({"name": "Ada", "address": {"city": "London", "zip": "N1"}}),
            )
            .await
            .unwrap();

        let merged = store
            .set("u1", &json!({"address": {"city": "Oslo"}, "age": 36}))
            .await
            .unwrap();
        assert_eq!(
            Value::Object(merged),
            json!({
                "id": "u1",
                "name": "Ada",
                "age": 36,
                "address": {"city": "Oslo", "zip": "N1"}
            })
        );
    }

    #[tokio::test]
    async fn tables_are_isolated() {
        let users = MemoryStore::new().with_table("users");
        let orders = users.with_table("orders");

        users.set("x", &json!({"kind": "user"})).await.unwrap();
        assert_eq!(orders.get("x").await, Err(StoreError::NotFound));
        assert!(orders.all().await.unwrap().is_empty());
        assert_eq!(users.client().len("users"), 1);
        assert!(users.client().is_empty("orders"));
    }

    #[tokio::test]
    async fn last_term_wins_by_default() {
        let store = seeded(TermMode::default()).await;
        let terms = [Term::new("a", "==", 1), Term::new("b", "==", 2)];
        let found = store.query(&terms).await.unwrap();
        // Only `b == 2` applies, so a3 (a == 2) is included.
        assert_eq!(ids(&found), vec!["a2", "a3"]);
    }

    #[tokio::test]
    async fn all_terms_are_conjunctive() {
        let store = seeded(TermMode::AllTerms).await;
        let terms = [Term::new("a", "==", 1), Term::new("b", "==", 2)];
        let found = store.query(&terms).await.unwrap();
        assert_eq!(ids(&found), vec!["a2"]);
    }

    #[tokio::test]
    async fn operators() {
        let store = seeded(TermMode::default()).await;
        let run = |term: Term| {
            let store = store.clone();
            async move { store.query(&[term]).await.unwrap() }
        };

        assert_eq!(ids(&run(Term::new("n", ">", 1)).await), vec!["a1", "a2"]);
        assert_eq!(ids(&run(Term::new("n", "<=", 1.5)).await), vec!["a1"]);
        assert_eq!(ids(&run(Term::new("b", "!=", 1)).await), vec!["a2", "a3"]);
        assert_eq!(ids(&run(Term::new("n", "!=", Value::Null)).await), vec!["a1", "a2"]);
        assert_eq!(ids(&run(Term::new("n", "==", Value::Null)).await), vec!["a3"]);
        assert_eq!(
            ids(&run(Term::new("tags", "array-contains", "x")).await),
            vec!["a1"]
        );
        assert_eq!(
            ids(&run(Term::new("tags", "array-contains-any", json!(["y", "z"]))).await),
            vec!["a1", "a2"]
        );
        assert_eq!(ids(&run(Term::new("a", "in", json!([2, 3]))).await), vec!["a3"]);
        assert_eq!(
            ids(&run(Term::new("a", "not-in", json!([2]))).await),
            vec!["a1", "a2"]
        );
        assert!(run(Term::new("missing", "!=", 1)).await.is_empty());
        assert!(run(Term::new("a", ">", "text")).await.is_empty());
    }

    #[tokio::test]
    async fn malformed_queries_rejected() {
        let store = seeded(TermMode::default()).await;
        assert_eq!(store.query(&[]).await, Err(StoreError::InvalidData));
        assert_eq!(
            store.query(&[Term::new("a", "like", 1)]).await,
            Err(StoreError::InvalidData)
        );
    }

    #[tokio::test]
    async fn malformed_field_paths_rejected() {
        for term_mode in [TermMode::LastTermWins, TermMode::AllTerms] {
            let store = seeded(term_mode).await;
            for field in ["a..b", "a[0]"] {
                assert_eq!(
                    store.query(&[Term::new(field, "==", 1)]).await,
                    Err(StoreError::InvalidData),
                    "{field:?} under {term_mode:?}"
                );
            }
        }
    }

    #[test]
    fn lookup_nested_paths() {
        let r = record(json!({"a": {"b": {"c": 1}}, "x": 2}));
        assert_eq!(lookup(&r, "a.b.c"), Some(&json!(1)));
        assert_eq!(lookup(&r, "x"), Some(&json!(2)));
        assert_eq!(lookup(&r, "x.y"), None);
        assert_eq!(lookup(&r, "a.z"), None);
    }

    #[test]
    fn merge_replaces_with_empty_object() {
        let mut target = record(json!({"m": {"k": 1}}));
        merge(&mut target, record(json!({"m": {}})));
        assert_eq!(Value::Object(target), json!({"m": {}}));
    }

    #[test]
    fn numbers_compare_by_value() {
        assert!(equal(&json!(1), &json!(1.0)));
        assert_eq!(compare(&json!(2), &json!(10.5)), Some(Ordering::Less));
        assert_eq!(compare(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare(&json!(1), &json!("1")), None);
    }
}
