use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta as K8sMeta, OwnerReference};
use kinv_core::{ObjectMeta, OwnerRef, LAST_APPLIED_ANNOTATION};

/// Convert cluster object metadata into the record form, dropping the
/// `kubectl apply` bookkeeping annotation.
pub fn object_meta(m: &K8sMeta) -> ObjectMeta {
    let mut annotations: BTreeMap<String, String> = m.annotations.clone().unwrap_or_default();
    annotations.remove(LAST_APPLIED_ANNOTATION);
    ObjectMeta {
        name: m.name.clone().unwrap_or_default(),
        namespace: m.namespace.clone(),
        labels: m.labels.clone().unwrap_or_default(),
        annotations,
        creation_timestamp: m.creation_timestamp.as_ref().map(|t| t.0),
        owner_references: m
            .owner_references
            .iter()
            .flatten()
            .map(|o| OwnerRef {
                api_version: o.api_version.clone(),
                kind: o.kind.clone(),
                name: o.name.clone(),
                controller: o.controller.unwrap_or(false),
            })
            .collect(),
    }
}

/// The single controlling owner, if any. Non-controller references are ignored.
pub(crate) fn controller_of(m: &K8sMeta) -> Option<&OwnerReference> {
    m.owner_references.as_ref()?.iter().find(|o| o.controller == Some(true))
}
