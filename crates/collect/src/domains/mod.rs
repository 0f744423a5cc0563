//! Resource mappers, one module per domain.
//!
//! Each module keeps its field mapping in plain functions over the typed
//! cluster objects; the `Domain` impl around them only lists and records errors.

use std::{fmt::Debug, time::Duration};

use kinv_kubehub::{absent_as_empty, list_all, FetchError};
use kube::Api;
use serde::de::DeserializeOwned;

pub mod cluster;
pub mod custom_resources;
pub mod namespaces;
pub mod network_policy;
pub mod nodes;
pub mod storage;
pub mod workloads;

pub use cluster::ClusterDomain;
pub use custom_resources::CustomResourcesDomain;
pub use namespaces::NamespacesDomain;
pub use network_policy::NetworkPolicyDomain;
pub use nodes::NodesDomain;
pub use storage::StorageDomain;
pub use workloads::WorkloadsDomain;

/// List a kind; a kind the server does not serve lists as empty.
pub(crate) async fn list_or_empty<K>(api: &Api<K>, page: Option<u32>, timeout: Duration) -> Result<Vec<K>, FetchError>
where
    K: Clone + DeserializeOwned + Debug,
{
    absent_as_empty(list_all(api, page, timeout).await)
}
