//! crates/mentorship_core/src/memory.rs
//!
//! An in-process implementation of the `EntityStore` port. Used when the service
//! runs without a database and as the backing store of the test suites.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::ports::{
    ChangeEvent, ChangeKind, Collection, DocumentPage, EntityStore, Filter, PageRequest,
    PortError, PortResult,
};

const CHANGE_FEED_CAPACITY: usize = 256;

struct StoredDocument {
    /// Monotonic insertion sequence; pagination orders by it.
    seq: u64,
    body: Value,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    collections: HashMap<Collection, BTreeMap<String, StoredDocument>>,
}

pub struct InMemoryStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            changes,
        }
    }

    /// Number of documents currently held in a collection.
    pub fn count(&self, collection: Collection) -> PortResult<usize> {
        Ok(self
            .lock()?
            .collections
            .get(&collection)
            .map_or(0, |docs| docs.len()))
    }

    fn lock(&self) -> PortResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| PortError::Unexpected("in-memory store lock poisoned".to_string()))
    }

    fn publish(&self, collection: Collection, id: &str, body: &Value, kind: ChangeKind) {
        // No receivers is not an error.
        let _ = self
            .changes
            .send(ChangeEvent::for_document(collection, id, body, kind));
    }
}

fn encode_cursor(seq: u64) -> String {
    format!("c{:016x}", seq)
}

fn decode_cursor(cursor: &str) -> PortResult<u64> {
    cursor
        .strip_prefix('c')
        .and_then(|hex| u64::from_str_radix(hex, 16).ok())
        .ok_or_else(|| PortError::Validation(format!("invalid cursor '{}'", cursor)))
}

fn not_found(collection: Collection, id: &str) -> PortError {
    PortError::NotFound(format!("{} {}", collection, id))
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn insert(&self, collection: Collection, id: &str, document: Value) -> PortResult<()> {
        if !document.is_object() {
            return Err(PortError::Validation("documents must be JSON objects".to_string()));
        }
        {
            let mut inner = self.lock()?;
            let exists = inner
                .collections
                .get(&collection)
                .is_some_and(|docs| docs.contains_key(id));
            if exists {
                return Err(PortError::Validation(format!(
                    "{} {} already exists",
                    collection, id
                )));
            }
            // Rejected inserts never consume a sequence number.
            inner.next_seq += 1;
            let seq = inner.next_seq;
            inner.collections.entry(collection).or_default().insert(
                id.to_string(),
                StoredDocument {
                    seq,
                    body: document.clone(),
                },
            );
        }
        self.publish(collection, id, &document, ChangeKind::Created);
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> PortResult<Option<Value>> {
        Ok(self
            .lock()?
            .collections
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .map(|doc| doc.body.clone()))
    }

    async fn patch(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> PortResult<()> {
        let body = {
            let mut inner = self.lock()?;
            let doc = inner
                .collections
                .get_mut(&collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| not_found(collection, id))?;
            let Some(object) = doc.body.as_object_mut() else {
                return Err(PortError::Unexpected(format!("{} {} is corrupt", collection, id)));
            };
            object.extend(fields);
            doc.body.clone()
        };
        self.publish(collection, id, &body, ChangeKind::Updated);
        Ok(())
    }

    async fn patch_if(
        &self,
        collection: Collection,
        id: &str,
        expected: &[Filter],
        fields: Map<String, Value>,
    ) -> PortResult<bool> {
        let body = {
            let mut inner = self.lock()?;
            let doc = inner
                .collections
                .get_mut(&collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| not_found(collection, id))?;
            if !expected.iter().all(|f| f.matches(&doc.body)) {
                return Ok(false);
            }
            let Some(object) = doc.body.as_object_mut() else {
                return Err(PortError::Unexpected(format!("{} {} is corrupt", collection, id)));
            };
            object.extend(fields);
            doc.body.clone()
        };
        self.publish(collection, id, &body, ChangeKind::Updated);
        Ok(true)
    }

    async fn delete(&self, collection: Collection, id: &str) -> PortResult<()> {
        let removed = self
            .lock()?
            .collections
            .get_mut(&collection)
            .and_then(|docs| docs.remove(id))
            .ok_or_else(|| not_found(collection, id))?;
        self.publish(collection, id, &removed.body, ChangeKind::Deleted);
        Ok(())
    }

    async fn query(&self, collection: Collection, filters: &[Filter]) -> PortResult<Vec<Value>> {
        let inner = self.lock()?;
        let Some(docs) = inner.collections.get(&collection) else {
            return Ok(Vec::new());
        };
        let mut matching: Vec<&StoredDocument> = docs
            .values()
            .filter(|doc| filters.iter().all(|f| f.matches(&doc.body)))
            .collect();
        matching.sort_by_key(|doc| doc.seq);
        Ok(matching.into_iter().map(|doc| doc.body.clone()).collect())
    }

    async fn page(
        &self,
        collection: Collection,
        filters: &[Filter],
        request: &PageRequest,
    ) -> PortResult<DocumentPage> {
        let after = request.cursor.as_deref().map(decode_cursor).transpose()?;
        let inner = self.lock()?;
        let mut matching: Vec<&StoredDocument> = inner
            .collections
            .get(&collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| after.map_or(true, |seq| doc.seq > seq))
                    .filter(|doc| filters.iter().all(|f| f.matches(&doc.body)))
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by_key(|doc| doc.seq);

        let has_more = matching.len() > request.page_size;
        matching.truncate(request.page_size);
        let next_cursor = matching.last().map(|doc| encode_cursor(doc.seq));
        Ok(DocumentPage {
            documents: matching.into_iter().map(|doc| doc.body.clone()).collect(),
            next_cursor,
            has_more,
        })
    }

    async fn increment(
        &self,
        collection: Collection,
        id: &str,
        field: &str,
        delta: i64,
    ) -> PortResult<()> {
        let body = {
            let mut inner = self.lock()?;
            let doc = inner
                .collections
                .get_mut(&collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| not_found(collection, id))?;
            let Some(object) = doc.body.as_object_mut() else {
                return Err(PortError::Unexpected(format!("{} {} is corrupt", collection, id)));
            };
            let current = match object.get(field) {
                None | Some(Value::Null) => 0,
                Some(value) => value.as_i64().ok_or_else(|| {
                    PortError::Validation(format!("{} on {} {} is not an integer", field, collection, id))
                })?,
            };
            let next = current.checked_add(delta).ok_or_else(|| {
                PortError::Validation(format!("{} on {} {} would overflow", field, collection, id))
            })?;
            object.insert(field.to_string(), Value::from(next));
            doc.body.clone()
        };
        self.publish(collection, id, &body, ChangeKind::Updated);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn increments_treat_missing_fields_as_zero() {
        let store = InMemoryStore::new();
        store
            .insert(Collection::Users, "u1", json!({ "id": "u1" }))
            .await
            .unwrap();
        store
            .increment(Collection::Users, "u1", "committedMinutes", 90)
            .await
            .unwrap();
        store
            .increment(Collection::Users, "u1", "committedMinutes", -30)
            .await
            .unwrap();
        let doc = store.get(Collection::Users, "u1").await.unwrap().unwrap();
        assert_eq!(doc["committedMinutes"], 60);
    }

    #[tokio::test]
    async fn conditional_patches_write_only_while_the_condition_holds() {
        let store = InMemoryStore::new();
        store
            .insert(Collection::Invitations, "i1", json!({ "id": "i1", "status": "pending" }))
            .await
            .unwrap();
        let pending = [Filter::eq("status", "pending")];
        let accept = || {
            let mut fields = Map::new();
            fields.insert("status".to_string(), json!("accepted"));
            fields
        };

        assert!(store
            .patch_if(Collection::Invitations, "i1", &pending, accept())
            .await
            .unwrap());
        assert!(!store
            .patch_if(Collection::Invitations, "i1", &pending, accept())
            .await
            .unwrap());
        let err = store
            .patch_if(Collection::Invitations, "missing", &pending, accept())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejected_inserts_do_not_shift_cursors() {
        let store = InMemoryStore::new();
        store
            .insert(Collection::Goals, "g1", json!({ "id": "g1" }))
            .await
            .unwrap();
        assert!(store
            .insert(Collection::Goals, "g1", json!({ "id": "g1" }))
            .await
            .is_err());
        store
            .insert(Collection::Goals, "g2", json!({ "id": "g2" }))
            .await
            .unwrap();

        let page = store
            .page(Collection::Goals, &[], &PageRequest::first(10))
            .await
            .unwrap();
        assert_eq!(page.next_cursor.as_deref(), Some(encode_cursor(2).as_str()));
    }

    #[tokio::test]
    async fn writes_publish_change_events() {
        let store = InMemoryStore::new();
        let mut changes = store.subscribe();
        store
            .insert(Collection::Goals, "g1", json!({ "id": "g1", "organizationId": "org1" }))
            .await
            .unwrap();
        let event = changes.recv().await.unwrap();
        assert_eq!(event.collection, Collection::Goals);
        assert_eq!(event.organization_id.as_deref(), Some("org1"));
        assert_eq!(event.kind, ChangeKind::Created);
    }

    #[tokio::test]
    async fn rejects_malformed_cursors() {
        let store = InMemoryStore::new();
        let request = PageRequest {
            page_size: 10,
            cursor: Some("page-2".to_string()),
        };
        let err = store.page(Collection::Users, &[], &request).await.unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));
    }
}
