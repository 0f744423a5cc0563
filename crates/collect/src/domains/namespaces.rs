use k8s_openapi::api::core::v1::Namespace as K8sNamespace;
use kinv_core::{Inventory, Namespace};
use kinv_kubehub::ClusterHandle;
use kube::Api;
use tracing::info;

use super::list_or_empty;
use crate::{map_guarded, object_meta, CollectError, Domain};

const NAME: &str = "namespaces";

pub struct NamespacesDomain {
    handle: ClusterHandle,
}

impl NamespacesDomain {
    pub fn new(handle: ClusterHandle) -> Self {
        Self { handle }
    }
}

#[async_trait::async_trait]
impl Domain for NamespacesDomain {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn collect(&self, inv: &mut Inventory) -> Vec<CollectError> {
        let api: Api<K8sNamespace> = Api::all(self.handle.client.clone());
        let items = match list_or_empty(&api, None, self.handle.timeout).await {
            Ok(items) => items,
            Err(e) => return vec![CollectError::domain(NAME, format!("listing namespaces: {e}"))],
        };
        let mut errors = Vec::new();
        inv.namespaces = items
            .iter()
            .filter_map(|ns| {
                let subject = ns.metadata.name.clone().unwrap_or_default();
                map_guarded(NAME, &subject, || Ok(Namespace { meta: object_meta(&ns.metadata) }))
                    .map_err(|e| errors.push(e))
                    .ok()
            })
            .collect();
        info!(count = inv.namespaces.len(), "namespaces collected");
        errors
    }
}
