//! Acknowledgment returned by the inventory server and the cache that holds it.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn is_empty(s: &str) -> bool {
    s.is_empty()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterAck {
    #[serde(skip_serializing_if = "is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub operator_name: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub provider_name: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceLevel {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_technical_operations: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_technical_management: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_application_operations: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_application_management: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_custom_operations: Option<bool>,
    #[serde(skip_serializing_if = "is_empty")]
    pub custom_operations_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AckMetaData {
    #[serde(skip_serializing_if = "is_empty")]
    pub cluster_type: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub partition: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub region: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub environment_name: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub infrastructure_provider: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub resilience_zone: String,
    pub service_level: ServiceLevel,
    #[serde(skip_serializing_if = "is_empty")]
    pub subscription_id: String,
}

/// Body of a 2xx response to the inventory PUT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub cluster: ClusterAck,
    #[serde(default)]
    pub meta_data: AckMetaData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// What the local metadata endpoint serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMetadata {
    pub updated: DateTime<Utc>,
    pub cluster: ClusterAck,
    pub meta_data: AckMetaData,
}

impl DeliveryMetadata {
    pub fn from_ack(ack: AckResponse, updated: DateTime<Utc>) -> Self {
        Self { updated, cluster: ack.cluster, meta_data: ack.meta_data }
    }
}

/// Latest acknowledgment, replaced whole on each successful delivery.
pub struct AckCache {
    current: ArcSwapOption<DeliveryMetadata>,
}

impl AckCache {
    pub fn new() -> Self {
        Self { current: ArcSwapOption::empty() }
    }

    pub fn store(&self, meta: DeliveryMetadata) {
        self.current.store(Some(Arc::new(meta)));
    }

    /// `None` until the first successful delivery.
    pub fn current(&self) -> Option<Arc<DeliveryMetadata>> {
        self.current.load_full()
    }
}

impl Default for AckCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_ack_decodes_with_defaults() {
        let ack: AckResponse = serde_json::from_str(r#"{"cluster":{"name":"prod1"},"meta_data":{"service_level":{"has_custom_operations":true}}}"#).unwrap();
        assert_eq!(ack.cluster.name, "prod1");
        assert_eq!(ack.meta_data.service_level.has_custom_operations, Some(true));
        assert_eq!(ack.meta_data.service_level.has_technical_operations, None);
        assert!(ack.message.is_none());
    }

    #[test]
    fn metadata_omits_empty_fields() {
        let meta = DeliveryMetadata::from_ack(
            AckResponse { cluster: ClusterAck { id: "c-1".into(), ..Default::default() }, ..Default::default() },
            DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        );
        let v = serde_json::to_value(&meta).unwrap();
        assert_eq!(v["cluster"], serde_json::json!({"id": "c-1"}));
        assert_eq!(v["meta_data"], serde_json::json!({"service_level": {}}));
        assert_eq!(v["updated"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn cache_starts_empty() {
        let cache = AckCache::new();
        assert!(cache.current().is_none());
        cache.store(DeliveryMetadata::from_ack(AckResponse::default(), Utc::now()));
        assert!(cache.current().is_some());
    }
}
