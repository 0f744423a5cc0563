//! Owner resolution: walk controller references up to the root ancestor.
//!
//! The walk is iterative with a visited set and a hop limit, so cyclic or
//! adversarial owner graphs terminate. Fetched objects are cached for the
//! lifetime of one resolver (one collection cycle); pods sharing a
//! ReplicaSet share its lookups.

use std::sync::{Arc, Mutex};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as K8sMeta;
use kinv_core::{RootOwner, TypeMeta, Workload};
use kinv_kubehub::{split_api_version, FetchError, ObjectFetcher, ObjectRef};
use kube::core::DynamicObject;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::meta::{controller_of, object_meta};

/// Upper bound on hops in one chain.
pub const MAX_HOPS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("getting owner {owner}: {source}")]
    Fetch {
        owner: String,
        #[source]
        source: FetchError,
    },
    #[error("owner reference cycle at {0}")]
    Cycle(String),
    #[error("owner chain exceeds {} hops", MAX_HOPS)]
    TooLong,
}

/// A resolved chain: the root identity plus a metadata-only record for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub root: RootOwner,
    pub placeholder: Workload,
}

fn describe(r: &ObjectRef) -> String {
    match &r.namespace {
        Some(ns) => format!("{}/{} {}/{}", r.api_version, r.kind, ns, r.name),
        None => format!("{}/{} {}", r.api_version, r.kind, r.name),
    }
}

pub struct OwnerResolver {
    fetcher: Arc<dyn ObjectFetcher>,
    cache: Mutex<FxHashMap<ObjectRef, Option<Arc<DynamicObject>>>>,
}

impl OwnerResolver {
    pub fn new(fetcher: Arc<dyn ObjectFetcher>) -> Self {
        Self { fetcher, cache: Mutex::new(FxHashMap::default()) }
    }

    fn cached(&self, r: &ObjectRef) -> Option<Option<Arc<DynamicObject>>> {
        self.cache.lock().ok()?.get(r).cloned()
    }

    async fn fetch(&self, r: &ObjectRef) -> Result<Option<Arc<DynamicObject>>, ResolveError> {
        if let Some(hit) = self.cached(r) {
            return Ok(hit);
        }
        metrics::counter!("owner_fetch_total", 1u64);
        let obj = self
            .fetcher
            .fetch(r)
            .await
            .map_err(|source| ResolveError::Fetch { owner: describe(r), source })?
            .map(Arc::new);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(r.clone(), obj.clone());
        }
        Ok(obj)
    }

    /// Resolve the root owner of an object described by `meta`.
    ///
    /// `Ok(None)` when the object has no controller (it is its own root) or
    /// when any owner along the chain no longer exists.
    pub async fn resolve(&self, meta: &K8sMeta) -> Result<Option<Resolution>, ResolveError> {
        let Some(first) = controller_of(meta) else {
            return Ok(None);
        };
        // Owner references never cross namespaces.
        let namespace = meta.namespace.clone();
        let mut next = ObjectRef {
            api_version: first.api_version.clone(),
            kind: first.kind.clone(),
            namespace: namespace.clone(),
            name: first.name.clone(),
        };
        let mut visited: SmallVec<[ObjectRef; 8]> = SmallVec::new();

        loop {
            if visited.contains(&next) {
                return Err(ResolveError::Cycle(describe(&next)));
            }
            if visited.len() >= MAX_HOPS {
                return Err(ResolveError::TooLong);
            }
            let Some(obj) = self.fetch(&next).await? else {
                metrics::counter!("owner_vanished_total", 1u64);
                debug!(owner = %describe(&next), "owner vanished");
                return Ok(None);
            };
            match controller_of(&obj.metadata) {
                Some(parent) => {
                    let parent = ObjectRef {
                        api_version: parent.api_version.clone(),
                        kind: parent.kind.clone(),
                        namespace: namespace.clone(),
                        name: parent.name.clone(),
                    };
                    visited.push(std::mem::replace(&mut next, parent));
                }
                None => return Ok(Some(root_of(&next, &obj))),
            }
        }
    }
}

fn root_of(r: &ObjectRef, obj: &DynamicObject) -> Resolution {
    let (group, version) = split_api_version(&r.api_version);
    let meta = object_meta(&obj.metadata);
    let type_meta = TypeMeta::new(group, version, &r.kind);
    let root = RootOwner {
        kind: r.kind.clone(),
        api_group: type_meta.api_group.clone(),
        api_version: version.to_string(),
        name: meta.name.clone(),
        namespace: meta.namespace.clone(),
    };
    Resolution { root, placeholder: Workload::placeholder(type_meta, meta) }
}
