//! kinv read API façade (in-process).
//!
//! Defines the trait the local HTTP endpoints are served from, plus an
//! in-process implementation over the snapshot store and acknowledgment cache
//! and a mock for tests.

#![forbid(unsafe_code)]

use std::{sync::Arc, time::Instant};

use kinv_core::Inventory;
use kinv_deliver::{AckCache, DeliveryMetadata};
use kinv_store::SnapshotStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod http;

pub use http::router;

/// Read API errors. All of them surface as a 500 over HTTP.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("encoding response: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("internal: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Liveness plus a hint about the last cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Health {
    pub status: String,
    /// Number of snapshots published so far.
    pub epoch: u64,
    pub collection_succeeded: bool,
}

#[async_trait::async_trait]
pub trait InventoryApi: Send + Sync {
    /// The latest complete snapshot (an empty one before the first cycle).
    async fn inventory(&self) -> ApiResult<Arc<Inventory>>;

    /// Cached acknowledgment from the last successful delivery, if any.
    async fn metadata(&self) -> ApiResult<Option<Arc<DeliveryMetadata>>>;

    async fn health(&self) -> ApiResult<Health>;
}

pub struct InProcApi {
    store: Arc<SnapshotStore>,
    acks: Arc<AckCache>,
}

impl InProcApi {
    pub fn new(store: Arc<SnapshotStore>, acks: Arc<AckCache>) -> Self {
        Self { store, acks }
    }
}

#[async_trait::async_trait]
impl InventoryApi for InProcApi {
    async fn inventory(&self) -> ApiResult<Arc<Inventory>> {
        let t0 = Instant::now();
        let snap = self.store.current();
        debug!(workloads = snap.workloads.len(), epoch = self.store.epoch(), took_ms = %t0.elapsed().as_millis(), "api: inventory ok");
        Ok(snap)
    }

    async fn metadata(&self) -> ApiResult<Option<Arc<DeliveryMetadata>>> {
        let meta = self.acks.current();
        debug!(present = meta.is_some(), "api: metadata ok");
        Ok(meta)
    }

    async fn health(&self) -> ApiResult<Health> {
        Ok(Health {
            status: "ok".into(),
            epoch: self.store.epoch(),
            collection_succeeded: self.store.current().collection_succeeded,
        })
    }
}

/// Canned responses; `failing` makes every call return an internal error.
#[derive(Default)]
pub struct MockApi {
    pub inventory: Arc<Inventory>,
    pub metadata: Option<Arc<DeliveryMetadata>>,
    pub failing: bool,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> ApiResult<()> {
        if self.failing {
            return Err(ApiError::Internal("mock failure".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl InventoryApi for MockApi {
    async fn inventory(&self) -> ApiResult<Arc<Inventory>> {
        self.check()?;
        Ok(self.inventory.clone())
    }

    async fn metadata(&self) -> ApiResult<Option<Arc<DeliveryMetadata>>> {
        self.check()?;
        Ok(self.metadata.clone())
    }

    async fn health(&self) -> ApiResult<Health> {
        self.check()?;
        Ok(Health { status: "ok".into(), epoch: 0, collection_succeeded: self.inventory.collection_succeeded })
    }
}
