use kinv_kubehub::{ClientOptions, ClusterHandle};

use crate::{
    domains::{
        ClusterDomain, CustomResourcesDomain, NamespacesDomain, NetworkPolicyDomain, NodesDomain, StorageDomain, WorkloadsDomain,
    },
    Domain, DomainSource,
};

/// Live cluster domains. Each `acquire` builds a fresh client and discovery catalog.
pub struct KubeDomains {
    opts: ClientOptions,
}

impl KubeDomains {
    pub fn new(opts: ClientOptions) -> Self {
        Self { opts }
    }
}

#[async_trait::async_trait]
impl DomainSource for KubeDomains {
    async fn acquire(&self) -> anyhow::Result<Vec<Box<dyn Domain>>> {
        let h = ClusterHandle::acquire(&self.opts).await?;
        Ok(vec![
            Box::new(ClusterDomain::new(h.clone())),
            Box::new(NamespacesDomain::new(h.clone())),
            Box::new(NodesDomain::new(h.clone())),
            Box::new(StorageDomain::new(h.clone())),
            Box::new(NetworkPolicyDomain::new(h.clone())),
            Box::new(CustomResourcesDomain::new(h.clone())),
            Box::new(WorkloadsDomain::new(h)),
        ])
    }
}
