use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node as K8sNode;
use kinv_core::{Inventory, Node};
use kinv_kubehub::ClusterHandle;
use kube::Api;
use tracing::info;

use super::list_or_empty;
use crate::{map_guarded, object_meta, quantity, CollectError, Domain};

const NAME: &str = "nodes";

const ROLE_LABELS: [&str; 4] = ["controlplane", "control-plane", "master", "etcd"];

fn first_label<'a>(labels: &'a BTreeMap<String, String>, keys: &[&str]) -> &'a str {
    keys.iter().filter_map(|k| labels.get(*k)).find(|v| !v.is_empty()).map(String::as_str).unwrap_or_default()
}

/// Comma separated roles from `node-role.kubernetes.io/*`; `worker` when none.
pub fn roles(labels: &BTreeMap<String, String>) -> String {
    let found: Vec<&str> =
        ROLE_LABELS.iter().copied().filter(|r| labels.contains_key(&format!("node-role.kubernetes.io/{r}"))).collect();
    if found.is_empty() {
        "worker".to_string()
    } else {
        found.join(",")
    }
}

/// `containerd://1.7.2` -> (`containerd`, `1.7.2`). Unparsable input is all version.
pub fn container_runtime(s: &str) -> (String, String) {
    match s.split_once("://") {
        Some((name, version)) => (name.to_string(), version.trim_end_matches('/').to_string()),
        None => (String::new(), s.to_string()),
    }
}

/// Scheme of a provider ID (`aws:///eu-west-1a/i-0abc` -> `aws`).
pub fn provider_from_id(id: &str) -> String {
    match id.split_once("://") {
        Some((scheme, _)) => scheme.to_string(),
        None => id.to_string(),
    }
}

pub fn map_node(o: &K8sNode) -> anyhow::Result<Node> {
    let meta = object_meta(&o.metadata);
    let spec = o.spec.clone().unwrap_or_default();
    let status = o.status.clone().unwrap_or_default();
    let info = status.node_info.unwrap_or_default();
    let capacity = status.capacity.unwrap_or_default();
    let allocatable = status.allocatable.unwrap_or_default();
    let (cri_name, cri_version) = container_runtime(&info.container_runtime_version);
    let role = roles(&meta.labels);

    Ok(Node {
        is_control_plane: role != "worker",
        role,
        kubelet_version: info.kubelet_version,
        kube_proxy_version: info.kube_proxy_version,
        kernel_version: info.kernel_version,
        os_image: info.os_image,
        container_runtime_version: info.container_runtime_version,
        cri_name,
        cri_version,
        provider: provider_from_id(spec.provider_id.as_deref().unwrap_or_default()),
        topology_region: first_label(&meta.labels, &["topology.kubernetes.io/region", "failure-domain.beta.kubernetes.io/region"])
            .to_string(),
        topology_zone: first_label(&meta.labels, &["topology.kubernetes.io/zone", "failure-domain.beta.kubernetes.io/zone"])
            .to_string(),
        cpu_capacity_millis: quantity::milli_value(capacity.get("cpu")),
        cpu_allocatable_millis: quantity::milli_value(allocatable.get("cpu")),
        memory_capacity_bytes: quantity::value(capacity.get("memory")),
        memory_allocatable_bytes: quantity::value(allocatable.get("memory")),
        pod_cidrs: spec.pod_cidrs.unwrap_or_default(),
        unschedulable: spec.unschedulable.unwrap_or(false),
        taints: spec.taints.map(|t| t.len()).unwrap_or(0),
        meta,
    })
}

pub struct NodesDomain {
    handle: ClusterHandle,
}

impl NodesDomain {
    pub fn new(handle: ClusterHandle) -> Self {
        Self { handle }
    }
}

#[async_trait::async_trait]
impl Domain for NodesDomain {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn collect(&self, inv: &mut Inventory) -> Vec<CollectError> {
        let api: Api<K8sNode> = Api::all(self.handle.client.clone());
        let items = match list_or_empty(&api, None, self.handle.timeout).await {
            Ok(items) => items,
            Err(e) => return vec![CollectError::domain(NAME, format!("listing nodes: {e}"))],
        };
        let mut errors = Vec::new();
        let mut nodes = Vec::with_capacity(items.len());
        for o in &items {
            let subject = o.metadata.name.clone().unwrap_or_default();
            match map_guarded(NAME, &subject, || map_node(o)) {
                Ok(n) => nodes.push(n),
                Err(e) => errors.push(e),
            }
        }
        inv.nodes = nodes;
        info!(count = inv.nodes.len(), errors = errors.len(), "nodes collected");
        errors
    }
}
