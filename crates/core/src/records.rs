//! Records produced by the non-workload mappers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workload::ObjectMeta;

/// Cluster-wide facts: server version, provider heuristics, operator metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub version: String,
    pub full_version: String,
    pub git_commit: String,
    pub build_date: String,
    pub platform: String,
    pub kubernetes_provider: String,
    pub infrastructure_provider: String,

    pub cluster_name: String,
    pub cluster_fqdn: String,
    pub cluster_type: String,
    pub cluster_description: String,
    pub cluster_resilience_zone: String,
    pub environment_name: String,
    pub infrastructure_environment_type: String,
    pub operator_name: String,
    pub operator_subscription_id: i64,
    pub provider_name: String,
    pub provider_subscription_id: i64,
    pub customer_name: String,
    pub customer_id: i64,
    pub billing_subject: String,
    pub billing_granularity: String,
    pub has_technical_operations: bool,
    pub has_technical_management: bool,
    pub has_application_operations: bool,
    pub has_application_management: bool,
    pub has_capacity_management: bool,
    pub has_custom_operations: bool,
    pub custom_operations_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Namespace {
    #[serde(flatten)]
    pub meta: ObjectMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Node {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    pub role: String,
    pub is_control_plane: bool,
    pub kubelet_version: String,
    pub kube_proxy_version: String,
    pub kernel_version: String,
    pub os_image: String,
    pub container_runtime_version: String,
    pub cri_name: String,
    pub cri_version: String,
    pub provider: String,
    pub topology_region: String,
    pub topology_zone: String,
    pub cpu_capacity_millis: i64,
    pub cpu_allocatable_millis: i64,
    pub memory_capacity_bytes: i64,
    pub memory_allocatable_bytes: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pod_cidrs: Vec<String>,
    pub unschedulable: bool,
    pub taints: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Storage {
    #[serde(default)]
    pub persistent_volumes: Vec<PersistentVolume>,
    #[serde(default)]
    pub storage_classes: Vec<StorageClass>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistentVolume {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    pub storage_class: String,
    pub claim: String,
    pub status: String,
    pub access_modes: String,
    pub volume_mode: String,
    pub capacity: i64,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageClass {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    pub provisioner: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkPolicy {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_selector: BTreeMap<String, String>,
    pub policy_types: Vec<String>,
    pub ingress_rules: usize,
    pub egress_rules: usize,
}

/// Presence flags for well-known operators plus summaries of the ones we read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomResources {
    pub has_velero: bool,
    pub has_kci_rocks: bool,
    pub has_rabbitmq: bool,
    pub has_calico: bool,
    pub has_contour: bool,
    pub has_external_secrets: bool,
    pub has_cert_manager: bool,
    pub has_gitops_toolkit: bool,
    pub has_prometheus: bool,
    #[serde(default)]
    pub velero: Velero,
    #[serde(default)]
    pub kci_rocks: KciRocks,
    #[serde(default)]
    pub rabbitmq: RabbitMq,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calico: Option<Calico>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Velero {
    pub backups: Vec<VeleroBackup>,
    pub schedules: Vec<VeleroSchedule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VeleroBackup {
    pub name: String,
    pub namespace: String,
    pub schedule_name: String,
    pub storage_location: String,
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
    pub items_backed_up: i64,
    pub total_items: i64,
    pub warnings: i64,
    pub errors: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VeleroSchedule {
    pub name: String,
    pub namespace: String,
    pub schedule: String,
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KciRocks {
    pub db_instances: Vec<KciRocksDbInstance>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KciRocksDbInstance {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    pub engine: String,
    pub host: String,
    pub port: i64,
    pub phase: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RabbitMq {
    pub clusters: Vec<RabbitMqCluster>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RabbitMqCluster {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    pub image: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Calico {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}
