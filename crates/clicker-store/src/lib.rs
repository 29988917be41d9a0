#![deny(warnings)]

//! Shared document store boundary: keyed merge-upserts, append-only
//! collections and realtime full-collection snapshots.
//!
//! The production store lives outside this workspace; `InMemoryStore` is the
//! reference implementation used by tests and the headless demo.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

pub mod identity;
pub mod memory;

pub use identity::{DeferredIdentity, IdentityProvider, IdentityState, StaticIdentity};
pub use memory::InMemoryStore;

/// Field map of a stored document.
pub type Document = serde_json::Map<String, Value>;

/// Application id used when none is configured.
pub const DEFAULT_APP_ID: &str = "default-app-id";

/// Errors surfaced by a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network or backend failure; retrying later may succeed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Caller may not read or write this collection.
    #[error("permission denied on {0}")]
    PermissionDenied(String),
    /// Writes must be JSON objects.
    #[error("document payload is not an object")]
    NotAnObject,
    /// The realtime feed ended; a new subscription is needed.
    #[error("subscription to {0} closed")]
    SubscriptionClosed(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Partial document for a merge or append, plus fields the server should stamp.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Patch {
    fields: Document,
    server_timestamps: Vec<String>,
}

impl Patch {
    /// Serialize `value`, which must encode as a JSON object.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, StoreError> {
        match serde_json::to_value(value)? {
            Value::Object(fields) => Ok(Self {
                fields,
                server_timestamps: Vec::new(),
            }),
            _ => Err(StoreError::NotAnObject),
        }
    }

    /// Ask the server to fill `field` with its own timestamp.
    pub fn server_timestamp(mut self, field: &str) -> Self {
        self.fields.remove(field);
        self.server_timestamps.push(field.to_string());
        self
    }

    pub fn fields(&self) -> &Document {
        &self.fields
    }

    pub fn server_timestamp_fields(&self) -> &[String] {
        &self.server_timestamps
    }

    pub fn into_parts(self) -> (Document, Vec<String>) {
        (self.fields, self.server_timestamps)
    }
}

/// One live document in a collection snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    /// Store-assigned creation order.
    pub seq: u64,
    pub data: Document,
}

impl DocumentSnapshot {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }
}

/// Every live document of a collection at one point in time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectionSnapshot {
    pub collection: String,
    pub documents: Vec<DocumentSnapshot>,
}

impl CollectionSnapshot {
    pub fn empty(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            documents: Vec::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&DocumentSnapshot> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Realtime feed of full-collection snapshots.
///
/// Intermediate snapshots may be coalesced; the latest one is always delivered.
#[derive(Debug)]
pub struct Subscription {
    collection: String,
    rx: watch::Receiver<Arc<CollectionSnapshot>>,
}

impl Subscription {
    pub fn new(collection: &str, rx: watch::Receiver<Arc<CollectionSnapshot>>) -> Self {
        Self {
            collection: collection.to_string(),
            rx,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Latest snapshot, marking it as seen.
    pub fn current(&mut self) -> Arc<CollectionSnapshot> {
        Arc::clone(&self.rx.borrow_and_update())
    }

    /// Wait for the next snapshot.
    pub async fn changed(&mut self) -> Result<Arc<CollectionSnapshot>, StoreError> {
        self.rx
            .changed()
            .await
            .map_err(|_| StoreError::SubscriptionClosed(self.collection.clone()))?;
        Ok(self.current())
    }
}

/// Shared document store consumed by the sync layer.
pub trait RemoteStore: Send + Sync + 'static {
    /// Create `key` or merge `patch` into it, stamping requested timestamp fields.
    fn merge_upsert(
        &self,
        collection: &str,
        key: &str,
        patch: Patch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Create a new document with a store-assigned id, returned on success.
    fn append(
        &self,
        collection: &str,
        patch: Patch,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Open a realtime feed. The current snapshot is available immediately.
    fn subscribe(&self, collection: &str) -> Result<Subscription, StoreError>;
}

/// Keep only the first `/`-separated segment of an app id; blank ids fall back to the default.
pub fn sanitize_app_id(raw: &str) -> String {
    let first = raw.split('/').next().unwrap_or("").trim();
    if first.is_empty() {
        DEFAULT_APP_ID.to_string()
    } else {
        first.to_string()
    }
}

/// Locations of the two shared collections for one application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionPaths {
    pub players: String,
    pub chat: String,
}

impl CollectionPaths {
    pub fn for_app(app_id: &str) -> Self {
        let app = sanitize_app_id(app_id);
        Self {
            players: format!("artifacts/{app}/public/data/scores"),
            chat: format!("artifacts/{app}/public/data/chat"),
        }
    }
}

impl Default for CollectionPaths {
    fn default() -> Self {
        Self::for_app(DEFAULT_APP_ID)
    }
}
