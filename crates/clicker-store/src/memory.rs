//! In-process store with realtime fan-out and fault injection.

use crate::{
    CollectionSnapshot, Document, DocumentSnapshot, Patch, RemoteStore, StoreError, Subscription,
};
use chrono::{DateTime, Utc};
use clicker_core::ServerTimestamp;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Shared, cloneable handle to one in-memory store. Clones see the same data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    latency: Mutex<Option<Duration>>,
    offline: AtomicBool,
    fail_writes: AtomicUsize,
    writes: AtomicU64,
    denied: Mutex<BTreeSet<String>>,
}

#[derive(Default)]
struct State {
    collections: BTreeMap<String, Collection>,
    next_seq: u64,
    next_auto_id: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

struct Collection {
    docs: BTreeMap<String, StoredDoc>,
    tx: watch::Sender<Arc<CollectionSnapshot>>,
}

struct StoredDoc {
    seq: u64,
    data: Document,
}

impl Collection {
    fn new(name: &str) -> Self {
        let (tx, _) = watch::channel(Arc::new(CollectionSnapshot::empty(name)));
        Self {
            docs: BTreeMap::new(),
            tx,
        }
    }

    fn snapshot(&self, name: &str) -> CollectionSnapshot {
        CollectionSnapshot {
            collection: name.to_string(),
            documents: self
                .docs
                .iter()
                .map(|(id, d)| DocumentSnapshot {
                    id: id.clone(),
                    seq: d.seq,
                    data: d.data.clone(),
                })
                .collect(),
        }
    }

    fn publish(&self, name: &str) {
        self.tx.send_replace(Arc::new(self.snapshot(name)));
    }
}

/// Recursive merge: nested objects merge key by key, everything else is replaced.
fn merge_into(target: &mut Document, fields: Document) {
    for (key, value) in fields {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming)
            }
            (Some(slot), value) => *slot = value,
            (None, value) => {
                target.insert(key, value);
            }
        }
    }
}

impl State {
    fn collection(&mut self, name: &str) -> &mut Collection {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Collection::new(name))
    }

    /// Strictly increasing server clock.
    fn stamp(&mut self) -> Result<Value, StoreError> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        Ok(serde_json::to_value(ServerTimestamp(ts))?)
    }

    fn resolve(&mut self, patch: Patch) -> Result<Document, StoreError> {
        let (mut fields, stamped) = patch.into_parts();
        for field in stamped {
            let ts = self.stamp()?;
            fields.insert(field, ts);
        }
        Ok(fields)
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_access(&self, collection: &str) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("offline".into()));
        }
        let denied = self.denied.lock().unwrap_or_else(PoisonError::into_inner);
        if denied.contains(collection) {
            return Err(StoreError::PermissionDenied(collection.to_string()));
        }
        Ok(())
    }

    fn check_write(&self, collection: &str) -> Result<(), StoreError> {
        self.check_access(collection)?;
        let injected = self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }

    fn merge(&self, collection: &str, key: &str, patch: Patch) -> Result<(), StoreError> {
        self.check_write(collection)?;
        let mut state = self.state();
        let fields = state.resolve(patch)?;
        state.next_seq += 1;
        let seq = state.next_seq;
        let coll = state.collection(collection);
        let doc = coll.docs.entry(key.to_string()).or_insert(StoredDoc {
            seq,
            data: Document::new(),
        });
        merge_into(&mut doc.data, fields);
        coll.publish(collection);
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(collection, key, "merge-upsert applied");
        Ok(())
    }

    fn append(&self, collection: &str, patch: Patch) -> Result<String, StoreError> {
        self.check_write(collection)?;
        let mut state = self.state();
        let fields = state.resolve(patch)?;
        state.next_seq += 1;
        state.next_auto_id += 1;
        let seq = state.next_seq;
        let id = format!("auto-{:012}", state.next_auto_id);
        let coll = state.collection(collection);
        coll.docs.insert(id.clone(), StoredDoc { seq, data: fields });
        coll.publish(collection);
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(collection, id = %id, "document appended");
        Ok(id)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every write by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// While offline, writes and new subscriptions fail with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` writes.
    pub fn fail_next_writes(&self, n: usize) {
        self.inner.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Reject reads and writes on `collection`.
    pub fn deny(&self, collection: &str) {
        self.inner
            .denied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(collection.to_string());
    }

    /// End every open subscription on `collection`.
    pub fn disconnect_subscribers(&self, collection: &str) {
        let mut state = self.inner.state();
        let coll = state.collection(collection);
        let (tx, _) = watch::channel(Arc::new(coll.snapshot(collection)));
        // dropping the old sender closes its receivers
        coll.tx = tx;
    }

    /// Fields of one document, if present.
    pub fn document(&self, collection: &str, key: &str) -> Option<Document> {
        let state = self.inner.state();
        state
            .collections
            .get(collection)
            .and_then(|c| c.docs.get(key))
            .map(|d| d.data.clone())
    }

    pub fn snapshot(&self, collection: &str) -> CollectionSnapshot {
        let state = self.inner.state();
        state
            .collections
            .get(collection)
            .map(|c| c.snapshot(collection))
            .unwrap_or_else(|| CollectionSnapshot::empty(collection))
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }
}

impl RemoteStore for InMemoryStore {
    fn merge_upsert(
        &self,
        collection: &str,
        key: &str,
        patch: Patch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let inner = Arc::clone(&self.inner);
        let collection = collection.to_string();
        let key = key.to_string();
        async move {
            inner.delay().await;
            inner.merge(&collection, &key, patch)
        }
    }

    fn append(
        &self,
        collection: &str,
        patch: Patch,
    ) -> impl Future<Output = Result<String, StoreError>> + Send {
        let inner = Arc::clone(&self.inner);
        let collection = collection.to_string();
        async move {
            inner.delay().await;
            inner.append(&collection, patch)
        }
    }

    fn subscribe(&self, collection: &str) -> Result<Subscription, StoreError> {
        self.inner.check_access(collection)?;
        let mut state = self.inner.state();
        let rx = state.collection(collection).tx.subscribe();
        Ok(Subscription::new(collection, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(v: serde_json::Value) -> Patch {
        Patch::from_serialize(&v).unwrap()
    }

    #[tokio::test]
    async fn merge_creates_then_merges() {
        let store = InMemoryStore::new();
        store
            .merge_upsert("c", "k", patch(json!({"a": 1, "inv": {"x": 1}})))
            .await
            .unwrap();
        store
            .merge_upsert("c", "k", patch(json!({"b": 2, "inv": {"y": 3}})))
            .await
            .unwrap();
        let doc = store.document("c", "k").unwrap();
        assert_eq!(serde_json::Value::Object(doc), json!({"a": 1, "b": 2, "inv": {"x": 1, "y": 3}}));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn server_timestamps_increase() {
        let store = InMemoryStore::new();
        for i in 0..3 {
            store
                .merge_upsert("c", "k", patch(json!({"n": i})).server_timestamp("ts"))
                .await
                .unwrap();
        }
        let id1 = store
            .append("c", patch(json!({})).server_timestamp("ts"))
            .await
            .unwrap();
        let id2 = store
            .append("c", patch(json!({})).server_timestamp("ts"))
            .await
            .unwrap();
        let t1: ServerTimestamp =
            serde_json::from_value(store.document("c", &id1).unwrap()["ts"].clone()).unwrap();
        let t2: ServerTimestamp =
            serde_json::from_value(store.document("c", &id2).unwrap()["ts"].clone()).unwrap();
        assert!(t2 > t1);
        let snap = store.snapshot("c");
        assert_eq!(snap.len(), 3);
        assert!(snap.get(&id2).unwrap().seq > snap.get(&id1).unwrap().seq);
    }

    #[tokio::test]
    async fn injected_and_offline_failures() {
        let store = InMemoryStore::new();
        store.fail_next_writes(1);
        assert!(matches!(
            store.merge_upsert("c", "k", patch(json!({"a": 1}))).await,
            Err(StoreError::Unavailable(_))
        ));
        store.merge_upsert("c", "k", patch(json!({"a": 1}))).await.unwrap();

        store.set_offline(true);
        assert!(store.append("c", patch(json!({}))).await.is_err());
        assert!(store.subscribe("c").is_err());
        store.set_offline(false);

        store.deny("secret");
        assert!(matches!(
            store.subscribe("secret"),
            Err(StoreError::PermissionDenied(_))
        ));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn subscribers_see_every_change() {
        let store = InMemoryStore::new();
        let mut sub = store.subscribe("c").unwrap();
        assert!(sub.current().is_empty());
        store.merge_upsert("c", "a", patch(json!({"v": 1}))).await.unwrap();
        let snap = sub.changed().await.unwrap();
        assert_eq!(snap.len(), 1);
        store.merge_upsert("c", "b", patch(json!({"v": 2}))).await.unwrap();
        let snap = sub.changed().await.unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.collection, "c");
    }

    #[tokio::test]
    async fn disconnect_closes_subscription() {
        let store = InMemoryStore::new();
        let mut sub = store.subscribe("c").unwrap();
        store.disconnect_subscribers("c");
        assert!(matches!(
            sub.changed().await,
            Err(StoreError::SubscriptionClosed(_))
        ));
        let mut fresh = store.subscribe("c").unwrap();
        store.merge_upsert("c", "a", patch(json!({}))).await.unwrap();
        assert_eq!(fresh.changed().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_writes() {
        let store = InMemoryStore::new();
        store.set_latency(Some(Duration::from_millis(500)));
        let start = tokio::time::Instant::now();
        store.merge_upsert("c", "k", patch(json!({}))).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
