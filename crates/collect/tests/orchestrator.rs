use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use kinv_collect::{CollectError, CycleOutcome, Domain, DomainSource, Orchestrator};
use kinv_core::{Inventory, Namespace, NetworkPolicy, Node, ObjectMeta, PersistentVolume, Publisher, TypeMeta, Workload};
use kinv_store::SnapshotStore;

type Fill = fn(&mut Inventory) -> Vec<CollectError>;

struct FakeDomain {
    name: &'static str,
    fill: Fill,
}

#[async_trait::async_trait]
impl Domain for FakeDomain {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn collect(&self, inv: &mut Inventory) -> Vec<CollectError> {
        (self.fill)(inv)
    }
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta { name: name.into(), ..Default::default() }
}

fn cluster(inv: &mut Inventory) -> Vec<CollectError> {
    inv.cluster.version = "1.29.1".into();
    vec![]
}
fn namespaces(inv: &mut Inventory) -> Vec<CollectError> {
    inv.namespaces.push(Namespace { meta: meta("default") });
    vec![]
}
fn nodes(inv: &mut Inventory) -> Vec<CollectError> {
    inv.nodes.push(Node { meta: meta("n1"), role: "worker".into(), ..Default::default() });
    vec![]
}
fn storage(inv: &mut Inventory) -> Vec<CollectError> {
    inv.storage.persistent_volumes.push(PersistentVolume { meta: meta("pv1"), ..Default::default() });
    vec![]
}
fn network_policies(inv: &mut Inventory) -> Vec<CollectError> {
    inv.network_policies.push(NetworkPolicy { meta: meta("deny"), ..Default::default() });
    vec![]
}
fn custom_resources_failing(_: &mut Inventory) -> Vec<CollectError> {
    vec![CollectError::domain("custom_resources", "listing velero.io/v1/Backup: timed out after 30s")]
}
fn custom_resources(inv: &mut Inventory) -> Vec<CollectError> {
    inv.custom_resources.has_velero = true;
    vec![]
}
fn workloads(inv: &mut Inventory) -> Vec<CollectError> {
    inv.workloads.push(Workload::placeholder(
        TypeMeta::new("apps", "v1", "Deployment"),
        ObjectMeta { name: "web".into(), namespace: Some("shop".into()), ..Default::default() },
    ));
    vec![]
}
fn panicking(_: &mut Inventory) -> Vec<CollectError> {
    panic!("unexpected null in node status")
}

struct FakeSource {
    fills: Vec<(&'static str, Fill)>,
    fail: AtomicBool,
}

impl FakeSource {
    fn new(fills: Vec<(&'static str, Fill)>) -> Arc<Self> {
        Arc::new(Self { fills, fail: AtomicBool::new(false) })
    }
}

#[async_trait::async_trait]
impl DomainSource for FakeSource {
    async fn acquire(&self) -> anyhow::Result<Vec<Box<dyn Domain>>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("no kubeconfig and not running in a cluster");
        }
        Ok(self.fills.iter().map(|(name, fill)| Box::new(FakeDomain { name: *name, fill: *fill }) as Box<dyn Domain>).collect())
    }
}

#[derive(Default)]
struct CountingPublisher {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait::async_trait]
impl Publisher for CountingPublisher {
    async fn publish(&self, _inventory: &Inventory) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("collector returned 503");
        }
        Ok(())
    }
}

fn healthy() -> Vec<(&'static str, Fill)> {
    vec![
        ("cluster", cluster as Fill),
        ("namespaces", namespaces as Fill),
        ("nodes", nodes as Fill),
        ("storage", storage as Fill),
        ("network_policies", network_policies as Fill),
        ("custom_resources", custom_resources as Fill),
        ("workloads", workloads as Fill),
    ]
}

#[tokio::test]
async fn one_failing_domain_leaves_the_others_intact() {
    let mut fills = healthy();
    fills[5] = ("custom_resources", custom_resources_failing as Fill);
    let store = Arc::new(SnapshotStore::new());
    let orch = Orchestrator::new(FakeSource::new(fills), store.clone(), Duration::from_secs(3600));

    let outcome = orch.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Collected { succeeded: false, errors: 1, delivered: None });

    let snap = store.current();
    assert!(!snap.collection_succeeded);
    assert_eq!(snap.collection_errors.len(), 1);
    assert!(snap.collection_errors[0].starts_with("custom_resources: "));
    assert_eq!(snap.cluster.version, "1.29.1");
    assert_eq!(snap.namespaces.len(), 1);
    assert_eq!(snap.nodes.len(), 1);
    assert_eq!(snap.storage.persistent_volumes.len(), 1);
    assert_eq!(snap.network_policies.len(), 1);
    assert_eq!(snap.workloads.len(), 1);
}

#[tokio::test]
async fn acquire_failure_is_visible_and_skips_delivery() {
    let source = FakeSource::new(healthy());
    let store = Arc::new(SnapshotStore::new());
    let publisher = Arc::new(CountingPublisher::default());
    let orch = Orchestrator::new(source.clone(), store.clone(), Duration::from_secs(3600)).with_publisher(publisher.clone());

    assert!(matches!(orch.run_cycle().await, CycleOutcome::Collected { succeeded: true, .. }));
    let good = store.current();

    source.fail.store(true, Ordering::SeqCst);
    for _ in 0..3 {
        let outcome = orch.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::AcquireFailed(msg) if msg.contains("kubeconfig")));
    }
    let snap = store.current();
    assert!(!snap.collection_succeeded);
    assert_eq!(snap.collection_errors.len(), 1, "{:?}", snap.collection_errors);
    assert!(snap.collection_errors[0].starts_with("cluster: acquiring cluster handle: "));
    assert!(snap.collection_errors[0].contains("kubeconfig"));
    // last known records are still served
    assert_eq!(snap.nodes, good.nodes);
    assert_eq!(snap.workloads, good.workloads);
    assert_eq!(store.epoch(), 4);
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);

    // retried on the next cycle
    source.fail.store(false, Ordering::SeqCst);
    assert!(matches!(orch.run_cycle().await, CycleOutcome::Collected { succeeded: true, .. }));
    assert!(store.current().collection_succeeded);
    assert!(store.current().collection_errors.is_empty());
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn delivery_failure_does_not_fail_the_snapshot() {
    let store = Arc::new(SnapshotStore::new());
    let publisher = Arc::new(CountingPublisher { fail: true, ..Default::default() });
    let orch = Orchestrator::new(FakeSource::new(healthy()), store.clone(), Duration::from_secs(3600)).with_publisher(publisher);

    let outcome = orch.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Collected { succeeded: true, errors: 0, delivered: Some(false) });
    assert!(store.current().collection_succeeded);
}

#[tokio::test]
async fn a_panicking_domain_is_recorded_not_fatal() {
    let mut fills = healthy();
    fills[2] = ("nodes", panicking as Fill);
    let store = Arc::new(SnapshotStore::new());
    let orch = Orchestrator::new(FakeSource::new(fills), store.clone(), Duration::from_secs(3600));

    let outcome = orch.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Collected { succeeded: false, errors: 1, .. }));
    let snap = store.current();
    assert!(snap.collection_errors[0].contains("unexpected null in node status"));
    assert_eq!(snap.workloads.len(), 1);
}

#[tokio::test]
async fn repeated_cycles_are_idempotent() {
    let store = Arc::new(SnapshotStore::new());
    let orch = Orchestrator::new(FakeSource::new(healthy()), store.clone(), Duration::from_secs(3600)).with_client_version("9.9.9");

    orch.run_cycle().await;
    let first = (*store.current()).clone();
    orch.run_cycle().await;
    let mut second = (*store.current()).clone();
    assert_eq!(first.client_version, "9.9.9");
    second.collected_at = first.collected_at;
    assert_eq!(first, second);
}
