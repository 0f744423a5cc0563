use k8s_openapi::api::{
    core::v1::{PersistentVolume as K8sPv, PersistentVolumeSpec},
    storage::v1::StorageClass as K8sStorageClass,
};
use kinv_core::{Inventory, PersistentVolume, StorageClass};
use kinv_kubehub::ClusterHandle;
use kube::Api;
use tracing::info;

use super::list_or_empty;
use crate::{map_guarded, object_meta, quantity, CollectError, Domain};

const NAME: &str = "storage";

/// Abbreviated access modes in canonical order, e.g. `RWO,ROX`.
pub fn access_modes(modes: &[String]) -> String {
    [("ReadWriteOnce", "RWO"), ("ReadOnlyMany", "ROX"), ("ReadWriteMany", "RWX"), ("ReadWriteOncePod", "RWOP")]
        .iter()
        .filter(|(full, _)| modes.iter().any(|m| m == full))
        .map(|(_, short)| *short)
        .collect::<Vec<_>>()
        .join(",")
}

fn volume_source(spec: &PersistentVolumeSpec) -> &'static str {
    if spec.csi.is_some() {
        "CSI"
    } else if spec.host_path.is_some() {
        "HostPath"
    } else if spec.local.is_some() {
        "Local"
    } else if spec.nfs.is_some() {
        "NFS"
    } else if spec.aws_elastic_block_store.is_some() {
        "AWSElasticBlockStore"
    } else if spec.azure_disk.is_some() {
        "AzureDisk"
    } else if spec.azure_file.is_some() {
        "AzureFile"
    } else if spec.gce_persistent_disk.is_some() {
        "GCEPersistentDisk"
    } else if spec.iscsi.is_some() {
        "ISCSI"
    } else if spec.fc.is_some() {
        "FC"
    } else if spec.cephfs.is_some() {
        "CephFS"
    } else if spec.rbd.is_some() {
        "RBD"
    } else if spec.cinder.is_some() {
        "Cinder"
    } else if spec.vsphere_volume.is_some() {
        "VsphereVolume"
    } else {
        "Unknown"
    }
}

pub fn map_pv(o: &K8sPv) -> anyhow::Result<PersistentVolume> {
    let spec = o.spec.clone().unwrap_or_default();
    let claim = spec
        .claim_ref
        .as_ref()
        .map(|c| {
            format!(
                "{}/{}/{}",
                c.namespace.as_deref().unwrap_or_default(),
                c.kind.as_deref().unwrap_or_default(),
                c.name.as_deref().unwrap_or_default()
            )
        })
        .unwrap_or_default();
    let mut meta = object_meta(&o.metadata);
    meta.owner_references.clear();
    Ok(PersistentVolume {
        meta,
        storage_class: spec.storage_class_name.clone().unwrap_or_default(),
        claim,
        status: o.status.as_ref().and_then(|s| s.phase.clone()).unwrap_or_default(),
        access_modes: access_modes(spec.access_modes.as_deref().unwrap_or_default()),
        volume_mode: spec.volume_mode.clone().unwrap_or_else(|| "Filesystem".into()),
        capacity: quantity::value(spec.capacity.as_ref().and_then(|c| c.get("storage"))),
        source: volume_source(&spec).to_string(),
    })
}

pub fn map_storage_class(o: &K8sStorageClass) -> anyhow::Result<StorageClass> {
    Ok(StorageClass { meta: object_meta(&o.metadata), provisioner: o.provisioner.clone() })
}

/// Persistent volumes and storage classes.
pub struct StorageDomain {
    handle: ClusterHandle,
}

impl StorageDomain {
    pub fn new(handle: ClusterHandle) -> Self {
        Self { handle }
    }
}

#[async_trait::async_trait]
impl Domain for StorageDomain {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn collect(&self, inv: &mut Inventory) -> Vec<CollectError> {
        let h = &self.handle;
        let mut errors = Vec::new();

        match list_or_empty(&Api::<K8sPv>::all(h.client.clone()), None, h.timeout).await {
            Ok(items) => {
                inv.storage.persistent_volumes = items
                    .iter()
                    .filter_map(|o| {
                        let subject = o.metadata.name.clone().unwrap_or_default();
                        map_guarded(NAME, &subject, || map_pv(o)).map_err(|e| errors.push(e)).ok()
                    })
                    .collect();
            }
            Err(e) => errors.push(CollectError::domain(NAME, format!("listing persistent volumes: {e}"))),
        }

        match list_or_empty(&Api::<K8sStorageClass>::all(h.client.clone()), None, h.timeout).await {
            Ok(items) => {
                inv.storage.storage_classes = items
                    .iter()
                    .filter_map(|o| {
                        let subject = o.metadata.name.clone().unwrap_or_default();
                        map_guarded(NAME, &subject, || map_storage_class(o)).map_err(|e| errors.push(e)).ok()
                    })
                    .collect();
            }
            Err(e) => errors.push(CollectError::domain(NAME, format!("listing storage classes: {e}"))),
        }

        info!(
            persistent_volumes = inv.storage.persistent_volumes.len(),
            storage_classes = inv.storage.storage_classes.len(),
            "storage collected"
        );
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::{
        api::core::v1::{CSIPersistentVolumeSource, ObjectReference, PersistentVolumeStatus},
        apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::ObjectMeta},
    };
    use std::collections::BTreeMap;

    #[test]
    fn access_modes_are_abbreviated_in_order() {
        let modes = vec!["ReadWriteMany".to_string(), "ReadWriteOnce".to_string()];
        assert_eq!(access_modes(&modes), "RWO,RWX");
        assert_eq!(access_modes(&[]), "");
    }

    #[test]
    fn maps_a_bound_csi_volume() {
        let o = K8sPv {
            metadata: ObjectMeta { name: Some("pvc-123".into()), ..Default::default() },
            spec: Some(PersistentVolumeSpec {
                access_modes: Some(vec!["ReadWriteOnce".into()]),
                capacity: Some(BTreeMap::from([("storage".to_string(), Quantity("10Gi".into()))])),
                claim_ref: Some(ObjectReference {
                    namespace: Some("shop".into()),
                    kind: Some("PersistentVolumeClaim".into()),
                    name: Some("data".into()),
                    ..Default::default()
                }),
                csi: Some(CSIPersistentVolumeSource { driver: "ebs.csi.aws.com".into(), volume_handle: "vol-1".into(), ..Default::default() }),
                storage_class_name: Some("gp3".into()),
                ..Default::default()
            }),
            status: Some(PersistentVolumeStatus { phase: Some("Bound".into()), ..Default::default() }),
        };
        let pv = map_pv(&o).unwrap();
        assert_eq!(pv.claim, "shop/PersistentVolumeClaim/data");
        assert_eq!(pv.access_modes, "RWO");
        assert_eq!(pv.capacity, 10 * 1024 * 1024 * 1024);
        assert_eq!(pv.source, "CSI");
        assert_eq!(pv.volume_mode, "Filesystem");
        assert_eq!(pv.status, "Bound");
        assert_eq!(pv.storage_class, "gp3");
    }
}
