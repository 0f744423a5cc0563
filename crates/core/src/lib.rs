//! kinv core types: the inventory document and the seams shared across crates.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod records;
mod workload;

pub use records::*;
pub use workload::{ObjectMeta, OwnerRef, RootOwner, TypeMeta, Workload, WorkloadId, CORE_GROUP};

/// Schema version of the serialized inventory document.
pub const INVENTORY_VERSION: u32 = 1;

/// Annotation injected by `kubectl apply`; never copied into records.
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// One complete cluster snapshot. Built fresh every cycle and published whole.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Inventory {
    pub inventory_version: u32,
    pub client_version: String,
    pub collected_at: DateTime<Utc>,
    pub collection_succeeded: bool,
    #[serde(default)]
    pub collection_errors: Vec<String>,
    #[serde(default)]
    pub cluster: Cluster,
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub network_policies: Vec<NetworkPolicy>,
    #[serde(default)]
    pub custom_resources: CustomResources,
    #[serde(default)]
    pub workloads: Vec<Workload>,
}

impl Inventory {
    /// Fresh snapshot for a new cycle; succeeds until an error is recorded.
    pub fn new(client_version: impl Into<String>) -> Self {
        Self {
            inventory_version: INVENTORY_VERSION,
            client_version: client_version.into(),
            collected_at: Utc::now(),
            collection_succeeded: true,
            ..Default::default()
        }
    }

    pub fn record_error(&mut self, err: impl ToString) {
        self.collection_succeeded = false;
        self.collection_errors.push(err.to_string());
    }
}

/// Downstream sink for a finished snapshot (the delivery pipeline in production).
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, inventory: &Inventory) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_inventory_succeeds_until_error_recorded() {
        let mut inv = Inventory::new("0.1.0");
        assert!(inv.collection_succeeded);
        assert_eq!(inv.inventory_version, INVENTORY_VERSION);
        inv.record_error("nodes: listing: timed out");
        assert!(!inv.collection_succeeded);
        assert_eq!(inv.collection_errors, vec!["nodes: listing: timed out".to_string()]);
    }

    #[test]
    fn inventory_json_uses_snake_case_fields() {
        let inv = Inventory::new("0.1.0");
        let v = serde_json::to_value(&inv).unwrap();
        assert!(v.get("collection_succeeded").is_some());
        assert!(v.get("network_policies").is_some());
        assert!(v["storage"].get("persistent_volumes").is_some());
    }
}
