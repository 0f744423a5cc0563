use k8s_openapi::api::networking::v1::NetworkPolicy as K8sNetworkPolicy;
use kinv_core::{Inventory, NetworkPolicy};
use kinv_kubehub::ClusterHandle;
use kube::Api;
use tracing::info;

use super::list_or_empty;
use crate::{map_guarded, object_meta, CollectError, Domain};

const NAME: &str = "network_policies";

pub fn map_network_policy(o: &K8sNetworkPolicy) -> anyhow::Result<NetworkPolicy> {
    let spec = o.spec.clone().unwrap_or_default();
    Ok(NetworkPolicy {
        meta: object_meta(&o.metadata),
        pod_selector: spec.pod_selector.match_labels.unwrap_or_default(),
        policy_types: spec.policy_types.unwrap_or_default(),
        ingress_rules: spec.ingress.map(|r| r.len()).unwrap_or(0),
        egress_rules: spec.egress.map(|r| r.len()).unwrap_or(0),
    })
}

pub struct NetworkPolicyDomain {
    handle: ClusterHandle,
}

impl NetworkPolicyDomain {
    pub fn new(handle: ClusterHandle) -> Self {
        Self { handle }
    }
}

#[async_trait::async_trait]
impl Domain for NetworkPolicyDomain {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn collect(&self, inv: &mut Inventory) -> Vec<CollectError> {
        let api: Api<K8sNetworkPolicy> = Api::all(self.handle.client.clone());
        let items = match list_or_empty(&api, None, self.handle.timeout).await {
            Ok(items) => items,
            Err(e) => return vec![CollectError::domain(NAME, format!("listing network policies: {e}"))],
        };
        let mut errors = Vec::new();
        inv.network_policies = items
            .iter()
            .filter_map(|o| {
                let subject = format!(
                    "{}/{}",
                    o.metadata.namespace.as_deref().unwrap_or_default(),
                    o.metadata.name.as_deref().unwrap_or_default()
                );
                map_guarded(NAME, &subject, || map_network_policy(o)).map_err(|e| errors.push(e)).ok()
            })
            .collect();
        info!(count = inv.network_policies.len(), "network policies collected");
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::{
        api::networking::v1::{NetworkPolicyIngressRule, NetworkPolicySpec},
        apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
    };
    use std::collections::BTreeMap;

    #[test]
    fn counts_rules_and_copies_selector() {
        let o = K8sNetworkPolicy {
            metadata: ObjectMeta { name: Some("deny-all".into()), namespace: Some("shop".into()), ..Default::default() },
            spec: Some(NetworkPolicySpec {
                pod_selector: LabelSelector {
                    match_labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
                    ..Default::default()
                },
                ingress: Some(vec![NetworkPolicyIngressRule::default(), NetworkPolicyIngressRule::default()]),
                policy_types: Some(vec!["Ingress".into(), "Egress".into()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let np = map_network_policy(&o).unwrap();
        assert_eq!(np.ingress_rules, 2);
        assert_eq!(np.egress_rules, 0);
        assert_eq!(np.pod_selector["app"], "web");
        assert_eq!(np.policy_types, vec!["Ingress", "Egress"]);
        assert_eq!(np.meta.namespace.as_deref(), Some("shop"));
    }
}
