use chrono::{DateTime, Utc};
use kinv_core::{Calico, CustomResources, Inventory, KciRocksDbInstance, RabbitMqCluster, VeleroBackup, VeleroSchedule};
use kinv_kubehub::{with_timeout, ApiCatalog, ClusterHandle, FetchError};
use kube::{core::DynamicObject, Api};
use serde_json::Value;
use tracing::{debug, info};

use super::list_or_empty;
use crate::{map_guarded, object_meta, CollectError, Domain};

const NAME: &str = "custom_resources";

pub const VELERO_BACKUPS: &str = "velero.io/v1/backups";
pub const KCI_DB_INSTANCES: &str = "kci.rocks/v1alpha1/dbinstances";
pub const RABBITMQ_CLUSTERS: &str = "rabbitmq.com/v1beta1/rabbitmqclusters";
pub const CALICO_CLUSTER_INFO: &str = "crd.projectcalico.org/v1/clusterinformations";
pub const CONTOUR_HTTPPROXIES: &str = "projectcontour.io/v1/httpproxies";
pub const EXTERNAL_SECRETS_STORES: &str = "external-secrets.io/v1alpha1/secretstores";
pub const CERT_MANAGER_ISSUERS: &str = "cert-manager.io/v1/issuers";
pub const FLUX_GIT_REPOSITORIES: &str = "source.toolkit.fluxcd.io/v1beta2/gitrepositories";
pub const PROMETHEUSES: &str = "monitoring.coreos.com/v1/prometheuses";

/// Set presence flags from discovery.
pub fn detect(catalog: &ApiCatalog, cr: &mut CustomResources) {
    cr.has_velero = catalog.has(VELERO_BACKUPS);
    cr.has_kci_rocks = catalog.has(KCI_DB_INSTANCES);
    cr.has_rabbitmq = catalog.has(RABBITMQ_CLUSTERS);
    cr.has_calico = catalog.has(CALICO_CLUSTER_INFO);
    cr.has_contour = catalog.has(CONTOUR_HTTPPROXIES);
    cr.has_external_secrets = catalog.has(EXTERNAL_SECRETS_STORES);
    cr.has_cert_manager = catalog.has(CERT_MANAGER_ISSUERS);
    cr.has_gitops_toolkit = catalog.has(FLUX_GIT_REPOSITORIES);
    cr.has_prometheus = catalog.has(PROMETHEUSES);
}

fn at<'a>(v: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(v, |cur, k| cur.get(*k))
}

fn str_at(v: &Value, path: &[&str]) -> String {
    at(v, path).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn i64_at(v: &Value, path: &[&str]) -> i64 {
    at(v, path).and_then(Value::as_i64).unwrap_or(0)
}

fn time_at(v: &Value, path: &[&str]) -> Option<DateTime<Utc>> {
    at(v, path)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

pub fn velero_backup(o: &DynamicObject) -> anyhow::Result<VeleroBackup> {
    let d = &o.data;
    Ok(VeleroBackup {
        name: o.metadata.name.clone().unwrap_or_default(),
        namespace: o.metadata.namespace.clone().unwrap_or_default(),
        schedule_name: o
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get("velero.io/schedule-name"))
            .cloned()
            .unwrap_or_default(),
        storage_location: str_at(d, &["spec", "storageLocation"]),
        phase: str_at(d, &["status", "phase"]),
        start_timestamp: time_at(d, &["status", "startTimestamp"]),
        completion_timestamp: time_at(d, &["status", "completionTimestamp"]),
        expiration: time_at(d, &["status", "expiration"]),
        items_backed_up: i64_at(d, &["status", "progress", "itemsBackedUp"]),
        total_items: i64_at(d, &["status", "progress", "totalItems"]),
        warnings: i64_at(d, &["status", "warnings"]),
        errors: i64_at(d, &["status", "errors"]),
    })
}

pub fn velero_schedule(o: &DynamicObject) -> anyhow::Result<VeleroSchedule> {
    let d = &o.data;
    Ok(VeleroSchedule {
        name: o.metadata.name.clone().unwrap_or_default(),
        namespace: o.metadata.namespace.clone().unwrap_or_default(),
        schedule: str_at(d, &["spec", "schedule"]),
        phase: str_at(d, &["status", "phase"]),
        last_backup: time_at(d, &["status", "lastBackup"]),
    })
}

pub fn kci_db_instance(o: &DynamicObject) -> anyhow::Result<KciRocksDbInstance> {
    let d = &o.data;
    Ok(KciRocksDbInstance {
        meta: object_meta(&o.metadata),
        engine: str_at(d, &["spec", "engine"]),
        host: str_at(d, &["spec", "generic", "host"]),
        port: i64_at(d, &["spec", "generic", "port"]),
        phase: str_at(d, &["status", "phase"]),
    })
}

pub fn rabbitmq_cluster(o: &DynamicObject) -> anyhow::Result<RabbitMqCluster> {
    Ok(RabbitMqCluster { meta: object_meta(&o.metadata), image: str_at(&o.data, &["spec", "image"]) })
}

pub fn calico(o: &DynamicObject) -> Calico {
    Calico {
        version: str_at(&o.data, &["spec", "calicoVersion"]),
        creation_timestamp: o.metadata.creation_timestamp.as_ref().map(|t| t.0),
        labels: o.metadata.labels.clone().unwrap_or_default(),
    }
}

fn subject_of(o: &DynamicObject) -> String {
    match &o.metadata.namespace {
        Some(ns) => format!("{}/{}", ns, o.metadata.name.as_deref().unwrap_or_default()),
        None => o.metadata.name.clone().unwrap_or_default(),
    }
}

/// Discovery flags plus summaries of the operators we know how to read.
pub struct CustomResourcesDomain {
    handle: ClusterHandle,
}

impl CustomResourcesDomain {
    pub fn new(handle: ClusterHandle) -> Self {
        Self { handle }
    }

    fn api(&self, api_version: &str, kind: &str) -> Option<Api<DynamicObject>> {
        let (ar, _) = self.handle.catalog.find(api_version, kind)?;
        Some(Api::all_with(self.handle.client.clone(), ar))
    }

    async fn list(&self, api_version: &str, kind: &str) -> Result<Vec<DynamicObject>, FetchError> {
        match self.api(api_version, kind) {
            Some(api) => list_or_empty(&api, None, self.handle.timeout).await,
            None => Ok(Vec::new()),
        }
    }

    async fn summarize<T>(
        &self,
        api_version: &str,
        kind: &str,
        map: fn(&DynamicObject) -> anyhow::Result<T>,
        errors: &mut Vec<CollectError>,
    ) -> Vec<T> {
        match self.list(api_version, kind).await {
            Ok(items) => items
                .iter()
                .filter_map(|o| map_guarded(NAME, &subject_of(o), || map(o)).map_err(|e| errors.push(e)).ok())
                .collect(),
            Err(e) => {
                errors.push(CollectError::domain(NAME, format!("listing {api_version}/{kind}: {e}")));
                Vec::new()
            }
        }
    }

    async fn calico(&self) -> Result<Option<Calico>, FetchError> {
        let Some(api) = self.api("crd.projectcalico.org/v1", "ClusterInformation") else {
            return Ok(None);
        };
        match with_timeout(self.handle.timeout, api.get_opt("default")).await {
            Ok(obj) => Ok(obj.as_ref().map(calico)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl Domain for CustomResourcesDomain {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn collect(&self, inv: &mut Inventory) -> Vec<CollectError> {
        let mut errors = Vec::new();
        let mut cr = CustomResources::default();
        detect(&self.handle.catalog, &mut cr);

        if cr.has_velero {
            cr.velero.backups = self.summarize("velero.io/v1", "Backup", velero_backup, &mut errors).await;
            cr.velero.schedules = self.summarize("velero.io/v1", "Schedule", velero_schedule, &mut errors).await;
        }
        if cr.has_kci_rocks {
            cr.kci_rocks.db_instances = self.summarize("kci.rocks/v1alpha1", "DbInstance", kci_db_instance, &mut errors).await;
        }
        if cr.has_rabbitmq {
            cr.rabbitmq.clusters = self.summarize("rabbitmq.com/v1beta1", "RabbitmqCluster", rabbitmq_cluster, &mut errors).await;
        }
        if cr.has_calico {
            match self.calico().await {
                Ok(c) => cr.calico = c,
                Err(e) => errors.push(CollectError::domain(NAME, format!("getting calico cluster information: {e}"))),
            }
        }
        debug!(velero = cr.has_velero, calico = cr.has_calico, "custom resource flags");
        inv.custom_resources = cr;
        info!(errors = errors.len(), "custom resources collected");
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::{ApiResource, GroupVersionKind};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn dynamic(name: &str, labels: &[(&str, &str)], data: Value) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("velero".into()),
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>()),
                ..Default::default()
            },
            data,
        }
    }

    #[test]
    fn flags_follow_discovery() {
        let catalog = ApiCatalog::from_resources(vec![
            (ApiResource::from_gvk(&GroupVersionKind::gvk("velero.io", "v1", "Backup")), true),
            (ApiResource::from_gvk(&GroupVersionKind::gvk("cert-manager.io", "v1", "Issuer")), true),
        ]);
        let mut cr = CustomResources::default();
        detect(&catalog, &mut cr);
        assert!(cr.has_velero);
        assert!(cr.has_cert_manager);
        assert!(!cr.has_rabbitmq);
        assert!(!cr.has_prometheus);
    }

    #[test]
    fn velero_backup_summary() {
        let o = dynamic(
            "daily-20240101",
            &[("velero.io/schedule-name", "daily")],
            json!({
                "spec": {"storageLocation": "default"},
                "status": {
                    "phase": "Completed",
                    "startTimestamp": "2024-01-01T01:00:00Z",
                    "progress": {"itemsBackedUp": 120, "totalItems": 121},
                    "warnings": 1
                }
            }),
        );
        let b = velero_backup(&o).unwrap();
        assert_eq!(b.schedule_name, "daily");
        assert_eq!(b.phase, "Completed");
        assert_eq!(b.items_backed_up, 120);
        assert_eq!(b.total_items, 121);
        assert_eq!(b.warnings, 1);
        assert_eq!(b.errors, 0);
        assert!(b.start_timestamp.is_some());
        assert!(b.expiration.is_none());
    }

    #[test]
    fn calico_version_is_read() {
        let c = calico(&dynamic("default", &[], json!({"spec": {"calicoVersion": "v3.26.1"}})));
        assert_eq!(c.version, "v3.26.1");
    }
}
