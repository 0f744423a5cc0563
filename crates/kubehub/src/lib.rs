//! kinv kubehub: cluster client acquisition, discovery catalog and object fetching

#![forbid(unsafe_code)]

use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    Client,
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Page size for paginated list calls.
pub const PAGE_SIZE: u32 = 500;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// 404-equivalent: the object or the resource kind is not there.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }
}

/// Run one cluster call with a bounded deadline.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, kube::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res.map_err(FetchError::from),
        Err(_) => {
            metrics::counter!("kube_call_timeout_total", 1u64);
            Err(FetchError::Timeout(timeout))
        }
    }
}

/// Maps a 404 on a list call to an empty result.
pub fn absent_as_empty<T>(res: Result<Vec<T>, FetchError>) -> Result<Vec<T>, FetchError> {
    match res {
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        other => other,
    }
}

/// List every object behind `api`, following continue tokens; each page gets its own deadline.
pub async fn list_all<K>(api: &Api<K>, page: Option<u32>, timeout: Duration) -> Result<Vec<K>, FetchError>
where
    K: Clone + DeserializeOwned + Debug,
{
    let mut out = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let mut lp = ListParams::default();
        if let Some(limit) = page {
            lp = lp.limit(limit);
        }
        if let Some(t) = token.take() {
            lp = lp.continue_token(&t);
        }
        let list = with_timeout(timeout, api.list(&lp)).await?;
        out.extend(list.items);
        match list.metadata.continue_ {
            Some(t) if !t.is_empty() => token = Some(t),
            _ => break,
        }
    }
    Ok(out)
}

/// Split `group/version` (or bare `v1`) into its parts.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    }
}

/// Every resource the API server serves, in every served version.
#[derive(Debug, Default)]
pub struct ApiCatalog {
    by_gvk: FxHashMap<(String, String, String), (ApiResource, bool)>,
    plurals: FxHashSet<String>,
}

impl ApiCatalog {
    pub async fn discover(client: Client, timeout: Duration) -> Result<Self, FetchError> {
        let discovery = with_timeout(timeout, Discovery::new(client).run()).await?;
        let mut entries = Vec::new();
        for group in discovery.groups() {
            for version in group.versions() {
                for (ar, caps) in group.versioned_resources(version) {
                    entries.push((ar, matches!(caps.scope, Scope::Namespaced)));
                }
            }
        }
        let catalog = Self::from_resources(entries);
        info!(resources = catalog.by_gvk.len(), "api discovery complete");
        Ok(catalog)
    }

    pub fn from_resources(entries: impl IntoIterator<Item = (ApiResource, bool)>) -> Self {
        let mut catalog = Self::default();
        for (ar, namespaced) in entries {
            catalog.plurals.insert(format!("{}/{}", ar.api_version, ar.plural));
            catalog.by_gvk.insert((ar.group.clone(), ar.version.clone(), ar.kind.clone()), (ar, namespaced));
        }
        catalog
    }

    /// Resource and scope for an owner-reference style `(apiVersion, kind)`.
    pub fn find(&self, api_version: &str, kind: &str) -> Option<&(ApiResource, bool)> {
        let (group, version) = split_api_version(api_version);
        self.by_gvk.get(&(group.to_string(), version.to_string(), kind.to_string()))
    }

    /// Lookup by `<groupVersion>/<plural>`, e.g. `velero.io/v1/backups`.
    pub fn has(&self, key: &str) -> bool {
        self.plurals.contains(key)
    }
}

/// Options applied to every acquired client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub impersonate: Option<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self { impersonate: None, connect_timeout: Duration::from_secs(10), read_timeout: Duration::from_secs(30) }
    }
}

/// Build a client from the inferred config (kubeconfig or in-cluster service account).
pub async fn connect(opts: &ClientOptions) -> Result<Client> {
    let mut config = kube::Config::infer().await.context("inferring cluster config")?;
    config.connect_timeout = Some(opts.connect_timeout);
    config.read_timeout = Some(opts.read_timeout);
    if let Some(user) = &opts.impersonate {
        config.auth_info.impersonate = Some(user.clone());
    }
    Client::try_from(config).context("building cluster client")
}

/// Everything one collection cycle needs to talk to the cluster.
#[derive(Clone)]
pub struct ClusterHandle {
    pub client: Client,
    pub catalog: Arc<ApiCatalog>,
    pub timeout: Duration,
}

impl ClusterHandle {
    pub async fn acquire(opts: &ClientOptions) -> Result<Self> {
        let client = connect(opts).await?;
        let catalog = ApiCatalog::discover(client.clone(), opts.read_timeout).await.context("running api discovery")?;
        Ok(Self { client, catalog: Arc::new(catalog), timeout: opts.read_timeout })
    }

    pub fn fetcher(&self) -> KubeFetcher {
        KubeFetcher { client: self.client.clone(), catalog: Arc::clone(&self.catalog), timeout: self.timeout }
    }
}

/// Address of an arbitrary object, as named by an owner reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

/// Read-only single-object lookup. `Ok(None)` means absent.
#[async_trait::async_trait]
pub trait ObjectFetcher: Send + Sync {
    async fn fetch(&self, r: &ObjectRef) -> Result<Option<DynamicObject>, FetchError>;
}

pub struct KubeFetcher {
    client: Client,
    catalog: Arc<ApiCatalog>,
    timeout: Duration,
}

#[async_trait::async_trait]
impl ObjectFetcher for KubeFetcher {
    async fn fetch(&self, r: &ObjectRef) -> Result<Option<DynamicObject>, FetchError> {
        let Some((ar, namespaced)) = self.catalog.find(&r.api_version, &r.kind) else {
            debug!(api_version = %r.api_version, kind = %r.kind, "kind not served");
            return Ok(None);
        };
        let api: Api<DynamicObject> = match (namespaced, r.namespace.as_deref()) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, ar),
            _ => Api::all_with(self.client.clone(), ar),
        };
        match with_timeout(self.timeout, api.get_opt(&r.name)).await {
            Err(e) if e.is_not_found() => Ok(None),
            other => other,
        }
    }
}
