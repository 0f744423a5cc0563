use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{ConfigMap, Node},
    apimachinery::pkg::version::Info,
};
use kinv_core::{Cluster, Inventory};
use kinv_kubehub::{with_timeout, ClusterHandle, FetchError};
use kube::{api::ListParams, Api};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use super::list_or_empty;
use crate::{CollectError, Domain};

const NAME: &str = "cluster";

pub const METADATA_NAMESPACE: &str = "netic-metadata-system";
pub const OPERATOR_SELECTOR: &str = "netic.dk/owned-by=operator";

static VERSION_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)").ok());

/// `v1.27.4+k3s1` -> `1.27.4`.
pub fn normalize_version(git_version: &str) -> String {
    VERSION_RE
        .as_ref()
        .and_then(|re| re.captures(git_version))
        .map(|c| format!("{}.{}.{}", &c[1], &c[2], &c[3]))
        .unwrap_or_else(|| git_version.trim_start_matches('v').to_string())
}

pub fn apply_version(cluster: &mut Cluster, info: &Info) {
    cluster.version = normalize_version(&info.git_version);
    cluster.full_version = info.git_version.clone();
    cluster.git_commit = info.git_commit.clone();
    cluster.build_date = info.build_date.clone();
    cluster.platform = info.platform.clone();
}

fn node_label<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.metadata.labels.as_ref()?.get(key).map(String::as_str)
}

pub fn kubernetes_provider(git_version: &str, nodes: &[Node]) -> String {
    let p = if git_version.contains("+k3s") {
        "k3s"
    } else if git_version.contains("+rke2") {
        "rke2"
    } else if git_version.contains("-eks-") {
        "eks"
    } else if git_version.contains("-gke.") {
        "gke"
    } else if nodes.iter().any(|n| node_label(n, "kubernetes.azure.com/cluster").is_some()) {
        "aks"
    } else {
        "undetected"
    };
    p.to_string()
}

pub fn infrastructure_provider(kubernetes_provider: &str, nodes: &[Node]) -> String {
    match kubernetes_provider {
        "aks" => return "azure".into(),
        "eks" => return "aws".into(),
        "gke" => return "gcp".into(),
        _ => {}
    }
    for node in nodes {
        let region = node_label(node, "topology.kubernetes.io/region").unwrap_or_default();
        let legacy = node_label(node, "failure-domain.beta.kubernetes.io/region").unwrap_or_default();
        if region.contains("netic") || legacy.contains("aalborg") {
            return "netic".into();
        }
        if node.spec.as_ref().and_then(|s| s.provider_id.as_deref()).is_some_and(|id| id.starts_with("kind")) {
            return "docker".into();
        }
    }
    "undetected".into()
}

fn parse_bool(s: Option<&String>) -> bool {
    matches!(s.map(String::as_str), Some("1" | "t" | "T" | "true" | "TRUE" | "True"))
}

fn parse_int(s: Option<&String>) -> i64 {
    s.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

/// Copy operator-maintained cluster metadata out of the ConfigMap data.
pub fn apply_operator_metadata(c: &mut Cluster, data: &BTreeMap<String, String>) {
    let s = |k: &str| data.get(k).cloned().unwrap_or_default();
    c.cluster_name = s("cluster-name");
    c.cluster_fqdn = s("cluster-fqdn");
    c.cluster_type = s("cluster-type");
    c.cluster_description = s("cluster-description");
    c.cluster_resilience_zone = s("cluster-resilience-zone");
    c.environment_name = s("environment-name");
    c.infrastructure_environment_type = s("infrastructure-environment-type");
    if c.environment_name.is_empty() {
        c.environment_name = "NA".into();
    }
    c.operator_name = s("operator-name");
    c.operator_subscription_id = parse_int(data.get("operator-subscription-id"));
    c.provider_name = s("provider-name");
    c.provider_subscription_id = parse_int(data.get("provider-subscription-id"));
    c.customer_name = s("customer-name");
    c.customer_id = parse_int(data.get("customer-id"));
    c.billing_subject = s("billing-subject");
    c.billing_granularity = s("billing-granularity");
    c.has_technical_operations = parse_bool(data.get("has-technical-operations"));
    c.has_technical_management = parse_bool(data.get("has-technical-management"));
    c.has_application_operations = parse_bool(data.get("has-application-operations"));
    c.has_application_management = parse_bool(data.get("has-application-management"));
    c.has_capacity_management = parse_bool(data.get("has-capacity-management"));
    c.has_custom_operations = parse_bool(data.get("has-custom-operations"));
    c.custom_operations_url = s("custom-operations-url");

    if c.cluster_fqdn.is_empty() && !c.cluster_name.is_empty() && !c.provider_name.is_empty() && !c.cluster_type.is_empty() {
        c.cluster_fqdn = format!("{}.{}.{}.k8s.netic.dk", c.cluster_name, c.provider_name, c.cluster_type);
    }
}

/// Fill both provider fields. Without a node list only the version string is
/// used, and the failed listing comes back as an error for the cycle.
pub fn detect_providers(cluster: &mut Cluster, git_version: &str, nodes: Result<Vec<Node>, FetchError>) -> Option<CollectError> {
    let (nodes, err) = match nodes {
        Ok(nodes) => (nodes, None),
        Err(e) => {
            warn!(error = %e, "listing nodes for provider detection");
            (Vec::new(), Some(CollectError::domain(NAME, format!("listing nodes for provider detection: {e}"))))
        }
    };
    cluster.kubernetes_provider = kubernetes_provider(git_version, &nodes);
    cluster.infrastructure_provider = infrastructure_provider(&cluster.kubernetes_provider, &nodes);
    if cluster.infrastructure_provider == "docker" {
        cluster.kubernetes_provider = "kind".into();
    }
    err
}

/// Server version, provider detection and operator metadata.
pub struct ClusterDomain {
    handle: ClusterHandle,
}

impl ClusterDomain {
    pub fn new(handle: ClusterHandle) -> Self {
        Self { handle }
    }

    async fn collect_version(&self, cluster: &mut Cluster) -> Result<(), CollectError> {
        let h = &self.handle;
        let info = with_timeout(h.timeout, h.client.apiserver_version())
            .await
            .map_err(|e| CollectError::domain(NAME, format!("getting server version: {e}")))?;
        apply_version(cluster, &info);

        let nodes = list_or_empty(&Api::<Node>::all(h.client.clone()), None, h.timeout).await;
        match detect_providers(cluster, &info.git_version, nodes) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn collect_operator_metadata(&self, cluster: &mut Cluster) -> Result<(), CollectError> {
        let h = &self.handle;
        let api: Api<ConfigMap> = Api::namespaced(h.client.clone(), METADATA_NAMESPACE);
        let lp = ListParams::default().labels(OPERATOR_SELECTOR);
        let cms = with_timeout(h.timeout, api.list(&lp))
            .await
            .map(|l| l.items)
            .or_else(|e| if e.is_not_found() { Ok(Vec::new()) } else { Err(e) })
            .map_err(|e| CollectError::domain(NAME, format!("getting operator metadata: {e}")))?;
        match cms.first() {
            Some(cm) => apply_operator_metadata(cluster, cm.data.as_ref().unwrap_or(&BTreeMap::new())),
            None => warn!(selector = OPERATOR_SELECTOR, "no operator metadata ConfigMap found"),
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Domain for ClusterDomain {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn collect(&self, inv: &mut Inventory) -> Vec<CollectError> {
        let mut errors = Vec::new();
        if let Err(e) = self.collect_version(&mut inv.cluster).await {
            errors.push(e);
        }
        if let Err(e) = self.collect_operator_metadata(&mut inv.cluster).await {
            errors.push(e);
        }
        info!(version = %inv.cluster.version, provider = %inv.cluster.kubernetes_provider, "cluster metadata collected");
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::{api::core::v1::NodeSpec, apimachinery::pkg::apis::meta::v1::ObjectMeta};

    fn node(labels: &[(&str, &str)], provider_id: Option<&str>) -> Node {
        Node {
            metadata: ObjectMeta {
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            spec: Some(NodeSpec { provider_id: provider_id.map(String::from), ..Default::default() }),
            ..Default::default()
        }
    }

    #[test]
    fn versions_are_normalized() {
        assert_eq!(normalize_version("v1.27.4+k3s1"), "1.27.4");
        assert_eq!(normalize_version("v1.26.6-eks-a5565ad"), "1.26.6");
        assert_eq!(normalize_version("weird"), "weird");
    }

    #[test]
    fn providers_are_detected() {
        assert_eq!(kubernetes_provider("v1.27.4+k3s1", &[]), "k3s");
        assert_eq!(kubernetes_provider("v1.26.6-eks-a5565ad", &[]), "eks");
        assert_eq!(infrastructure_provider("eks", &[]), "aws");
        let aks = node(&[("kubernetes.azure.com/cluster", "mc_rg")], Some("azure:///subscriptions/x"));
        assert_eq!(kubernetes_provider("v1.27.3", std::slice::from_ref(&aks)), "aks");
        assert_eq!(infrastructure_provider("undetected", &[node(&[("topology.kubernetes.io/region", "dk-netic-1")], None)]), "netic");
        assert_eq!(infrastructure_provider("undetected", &[node(&[], Some("kind://docker/kind/kind-control-plane"))]), "docker");
        assert_eq!(infrastructure_provider("undetected", &[]), "undetected");
    }

    #[test]
    fn failed_node_listing_is_reported() {
        let mut c = Cluster::default();
        let err = detect_providers(&mut c, "v1.26.6-eks-a5565ad", Err(FetchError::Timeout(std::time::Duration::from_secs(30))));
        assert_eq!(c.kubernetes_provider, "eks");
        assert_eq!(c.infrastructure_provider, "aws");
        let err = err.map(|e| e.to_string()).unwrap_or_default();
        assert!(err.starts_with("cluster: listing nodes for provider detection"), "{err}");

        let kind = node(&[], Some("kind://docker/kind/kind-control-plane"));
        assert!(detect_providers(&mut c, "v1.29.1", Ok(vec![kind])).is_none());
        assert_eq!(c.kubernetes_provider, "kind");
        assert_eq!(c.infrastructure_provider, "docker");
    }

    #[test]
    fn operator_metadata_fills_cluster_and_derives_fqdn() {
        let data: BTreeMap<String, String> = [
            ("cluster-name", "prod1"),
            ("provider-name", "netic"),
            ("cluster-type", "dedicated"),
            ("operator-subscription-id", "42"),
            ("customer-id", "not-a-number"),
            ("has-technical-operations", "true"),
            ("has-custom-operations", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let mut c = Cluster::default();
        apply_operator_metadata(&mut c, &data);
        assert_eq!(c.cluster_fqdn, "prod1.netic.dedicated.k8s.netic.dk");
        assert_eq!(c.environment_name, "NA");
        assert_eq!(c.operator_subscription_id, 42);
        assert_eq!(c.customer_id, 0);
        assert!(c.has_technical_operations);
        assert!(!c.has_custom_operations);
    }
}
