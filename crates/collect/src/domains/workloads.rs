//! Workload mappers and the merge with owner-resolution placeholders.
//!
//! Every mapped record goes through the [`OwnerResolver`]; roots that no
//! mapper enumerated come back as placeholders and are appended only when no
//! mapped record already carries their identity.

use std::{fmt::Debug, sync::Arc};

use k8s_openapi::{
    api::{
        apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
        batch::v1::{CronJob, CronJobSpec, CronJobStatus, Job},
        core::v1::{Container, Pod, PodTemplateSpec, Volume},
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta as K8sMeta,
};
use kinv_core::{Inventory, TypeMeta, Workload, WorkloadId};
use kinv_kubehub::{ClusterHandle, PAGE_SIZE};
use kube::{core::DynamicObject, Api};
use rustc_hash::FxHashSet;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::list_or_empty;
use crate::{map_guarded, object_meta, quantity, CollectError, Domain, OwnerResolver};

const NAME: &str = "workloads";

/// The two served generations of the scheduled-job kind.
#[derive(Debug, Clone)]
pub enum CronJobVariant {
    V1(CronJob),
    /// `batch/v1beta1`, read untyped; its spec and status match the v1 schema.
    V1Beta1(DynamicObject),
}

/// Everything listed for one workload pass.
#[derive(Debug, Clone, Default)]
pub struct WorkloadObjects {
    pub deployments: Vec<Deployment>,
    pub stateful_sets: Vec<StatefulSet>,
    pub replica_sets: Vec<ReplicaSet>,
    pub daemon_sets: Vec<DaemonSet>,
    pub cron_jobs: Vec<CronJobVariant>,
    pub jobs: Vec<Job>,
    pub pods: Vec<Pod>,
}

/// A cluster object that maps to one workload record.
pub trait WorkloadSource {
    fn kind(&self) -> &'static str;
    fn metadata(&self) -> &K8sMeta;
    fn to_workload(&self) -> anyhow::Result<Workload>;
}

fn containers(cs: &[Container]) -> Value {
    cs.iter()
        .map(|c| {
            let res = c.resources.clone().unwrap_or_default();
            let limits = res.limits.unwrap_or_default();
            let requests = res.requests.unwrap_or_default();
            json!({
                "name": c.name,
                "image": c.image.clone().unwrap_or_default(),
                "limits_cpu": quantity::milli_value(limits.get("cpu")),
                "limits_memory": quantity::value(limits.get("memory")),
                "requests_cpu": quantity::milli_value(requests.get("cpu")),
                "requests_memory": quantity::value(requests.get("memory")),
            })
        })
        .collect()
}

fn pod_template(t: &PodTemplateSpec) -> Value {
    let spec = t.spec.clone().unwrap_or_default();
    json!({
        "containers": containers(&spec.containers),
        "init_containers": containers(spec.init_containers.as_deref().unwrap_or_default()),
    })
}

fn volume_source(v: &Volume) -> &'static str {
    if v.persistent_volume_claim.is_some() {
        "PersistentVolumeClaim"
    } else if v.config_map.is_some() {
        "ConfigMap"
    } else if v.secret.is_some() {
        "Secret"
    } else if v.empty_dir.is_some() {
        "EmptyDir"
    } else if v.host_path.is_some() {
        "HostPath"
    } else if v.projected.is_some() {
        "Projected"
    } else if v.downward_api.is_some() {
        "DownwardAPI"
    } else if v.csi.is_some() {
        "CSI"
    } else if v.ephemeral.is_some() {
        "Ephemeral"
    } else if v.nfs.is_some() {
        "NFS"
    } else {
        "Unknown"
    }
}

fn record(type_meta: TypeMeta, meta: &K8sMeta, spec: Value, status: Value) -> Workload {
    Workload { type_meta, meta: object_meta(meta), spec, status, root_owner: None }
}

impl WorkloadSource for Deployment {
    fn kind(&self) -> &'static str {
        "Deployment"
    }
    fn metadata(&self) -> &K8sMeta {
        &self.metadata
    }
    fn to_workload(&self) -> anyhow::Result<Workload> {
        let spec = self.spec.clone().unwrap_or_default();
        let status = self.status.clone().unwrap_or_default();
        Ok(record(
            TypeMeta::new("apps", "v1", "Deployment"),
            &self.metadata,
            json!({
                "strategy": spec.strategy.and_then(|s| s.type_).unwrap_or_default(),
                "replicas": spec.replicas,
                "template": pod_template(&spec.template),
            }),
            json!({
                "replicas": status.replicas.unwrap_or(0),
                "ready_replicas": status.ready_replicas.unwrap_or(0),
                "updated_replicas": status.updated_replicas.unwrap_or(0),
                "available_replicas": status.available_replicas.unwrap_or(0),
                "unavailable_replicas": status.unavailable_replicas.unwrap_or(0),
            }),
        ))
    }
}

impl WorkloadSource for StatefulSet {
    fn kind(&self) -> &'static str {
        "StatefulSet"
    }
    fn metadata(&self) -> &K8sMeta {
        &self.metadata
    }
    fn to_workload(&self) -> anyhow::Result<Workload> {
        let spec = self.spec.clone().unwrap_or_default();
        let status = self.status.clone().unwrap_or_default();
        Ok(record(
            TypeMeta::new("apps", "v1", "StatefulSet"),
            &self.metadata,
            json!({
                "replicas": spec.replicas,
                "service_name": spec.service_name,
                "update_strategy": spec.update_strategy.and_then(|s| s.type_).unwrap_or_default(),
                "template": pod_template(&spec.template),
            }),
            json!({
                "replicas": status.replicas,
                "ready_replicas": status.ready_replicas.unwrap_or(0),
                "current_replicas": status.current_replicas.unwrap_or(0),
                "updated_replicas": status.updated_replicas.unwrap_or(0),
            }),
        ))
    }
}

impl WorkloadSource for ReplicaSet {
    fn kind(&self) -> &'static str {
        "ReplicaSet"
    }
    fn metadata(&self) -> &K8sMeta {
        &self.metadata
    }
    fn to_workload(&self) -> anyhow::Result<Workload> {
        let spec = self.spec.clone().unwrap_or_default();
        let status = self.status.clone().unwrap_or_default();
        Ok(record(
            TypeMeta::new("apps", "v1", "ReplicaSet"),
            &self.metadata,
            json!({
                "replicas": spec.replicas,
                "template": spec.template.as_ref().map(pod_template),
            }),
            json!({
                "replicas": status.replicas,
                "ready_replicas": status.ready_replicas.unwrap_or(0),
                "available_replicas": status.available_replicas.unwrap_or(0),
                "fully_labeled_replicas": status.fully_labeled_replicas.unwrap_or(0),
            }),
        ))
    }
}

impl WorkloadSource for DaemonSet {
    fn kind(&self) -> &'static str {
        "DaemonSet"
    }
    fn metadata(&self) -> &K8sMeta {
        &self.metadata
    }
    fn to_workload(&self) -> anyhow::Result<Workload> {
        let spec = self.spec.clone().unwrap_or_default();
        let status = self.status.clone().unwrap_or_default();
        Ok(record(
            TypeMeta::new("apps", "v1", "DaemonSet"),
            &self.metadata,
            json!({
                "update_strategy": spec.update_strategy.and_then(|s| s.type_).unwrap_or_default(),
                "template": pod_template(&spec.template),
            }),
            json!({
                "current_number_scheduled": status.current_number_scheduled,
                "desired_number_scheduled": status.desired_number_scheduled,
                "number_ready": status.number_ready,
                "number_available": status.number_available.unwrap_or(0),
                "number_misscheduled": status.number_misscheduled,
                "updated_number_scheduled": status.updated_number_scheduled.unwrap_or(0),
            }),
        ))
    }
}

fn cron_job_record(version: &str, meta: &K8sMeta, spec: &CronJobSpec, status: &CronJobStatus) -> Workload {
    let template = spec.job_template.spec.as_ref().map(|s| pod_template(&s.template));
    record(
        TypeMeta::new("batch", version, "CronJob"),
        meta,
        json!({
            "schedule": spec.schedule,
            "concurrency_policy": spec.concurrency_policy.clone().unwrap_or_default(),
            "suspend": spec.suspend.unwrap_or(false),
            "job_template": template,
        }),
        json!({
            "last_schedule_time": status.last_schedule_time.as_ref().map(|t| t.0),
            "last_successful_time": status.last_successful_time.as_ref().map(|t| t.0),
        }),
    )
}

impl WorkloadSource for CronJobVariant {
    fn kind(&self) -> &'static str {
        "CronJob"
    }
    fn metadata(&self) -> &K8sMeta {
        match self {
            CronJobVariant::V1(o) => &o.metadata,
            CronJobVariant::V1Beta1(o) => &o.metadata,
        }
    }
    fn to_workload(&self) -> anyhow::Result<Workload> {
        match self {
            CronJobVariant::V1(o) => {
                let spec = o.spec.clone().unwrap_or_default();
                let status = o.status.clone().unwrap_or_default();
                Ok(cron_job_record("v1", &o.metadata, &spec, &status))
            }
            CronJobVariant::V1Beta1(o) => {
                let spec_value = o.data.get("spec").cloned().ok_or_else(|| anyhow::anyhow!("missing spec"))?;
                let spec: CronJobSpec = serde_json::from_value(spec_value)?;
                let status: CronJobStatus = match o.data.get("status") {
                    Some(v) => serde_json::from_value(v.clone())?,
                    None => CronJobStatus::default(),
                };
                Ok(cron_job_record("v1beta1", &o.metadata, &spec, &status))
            }
        }
    }
}

impl WorkloadSource for Job {
    fn kind(&self) -> &'static str {
        "Job"
    }
    fn metadata(&self) -> &K8sMeta {
        &self.metadata
    }
    fn to_workload(&self) -> anyhow::Result<Workload> {
        let spec = self.spec.clone().unwrap_or_default();
        let status = self.status.clone().unwrap_or_default();
        Ok(record(
            TypeMeta::new("batch", "v1", "Job"),
            &self.metadata,
            json!({
                "parallelism": spec.parallelism,
                "completions": spec.completions,
                "backoff_limit": spec.backoff_limit,
                "template": pod_template(&spec.template),
            }),
            json!({
                "start_time": status.start_time.as_ref().map(|t| t.0),
                "completion_time": status.completion_time.as_ref().map(|t| t.0),
                "active": status.active.unwrap_or(0),
                "ready": status.ready,
                "succeeded": status.succeeded.unwrap_or(0),
                "failed": status.failed.unwrap_or(0),
            }),
        ))
    }
}

impl WorkloadSource for Pod {
    fn kind(&self) -> &'static str {
        "Pod"
    }
    fn metadata(&self) -> &K8sMeta {
        &self.metadata
    }
    fn to_workload(&self) -> anyhow::Result<Workload> {
        let spec = self.spec.clone().unwrap_or_default();
        let status = self.status.clone().unwrap_or_default();
        let volumes: Vec<Value> = spec
            .volumes
            .iter()
            .flatten()
            .map(|v| json!({"name": v.name, "source": volume_source(v)}))
            .collect();
        let conditions: Vec<Value> = status
            .conditions
            .iter()
            .flatten()
            .map(|c| json!({"type": c.type_, "status": c.status, "message": c.message}))
            .collect();
        let container_statuses: Vec<Value> = status
            .container_statuses
            .iter()
            .flatten()
            .map(|c| json!({"name": c.name, "image": c.image, "ready": c.ready, "restart_count": c.restart_count}))
            .collect();
        Ok(record(
            TypeMeta::new("", "v1", "Pod"),
            &self.metadata,
            json!({
                "containers": containers(&spec.containers),
                "init_containers": containers(spec.init_containers.as_deref().unwrap_or_default()),
                "restart_policy": spec.restart_policy,
                "service_account_name": spec.service_account_name,
                "node_name": spec.node_name,
                "host_network": spec.host_network.unwrap_or(false),
                "priority_class_name": spec.priority_class_name,
                "priority": spec.priority,
                "volumes": volumes,
            }),
            json!({
                "phase": status.phase,
                "pod_ip": status.pod_ip,
                "start_time": status.start_time.as_ref().map(|t| t.0),
                "qos_class": status.qos_class,
                "conditions": conditions,
                "container_statuses": container_statuses,
            }),
        ))
    }
}

/// Jobs spawned by a CronJob are represented by their CronJob.
pub fn owned_by_cron_job(meta: &K8sMeta) -> bool {
    meta.owner_references.iter().flatten().any(|o| o.kind == "CronJob")
}

fn subject_of<S: WorkloadSource>(o: &S) -> String {
    let m = o.metadata();
    match &m.namespace {
        Some(ns) => format!("{} {}/{}", o.kind(), ns, m.name.as_deref().unwrap_or_default()),
        None => format!("{} {}", o.kind(), m.name.as_deref().unwrap_or_default()),
    }
}

#[derive(Default)]
struct Assembly {
    records: Vec<Workload>,
    placeholders: Vec<Workload>,
    errors: Vec<CollectError>,
}

impl Assembly {
    async fn add<S: WorkloadSource + Sync>(&mut self, resolver: &OwnerResolver, o: &S) {
        let subject = subject_of(o);
        let mut w = match map_guarded(NAME, &subject, || o.to_workload()) {
            Ok(w) => w,
            Err(e) => {
                self.errors.push(e);
                return;
            }
        };
        match resolver.resolve(o.metadata()).await {
            Ok(Some(res)) => {
                w.root_owner = Some(res.root);
                self.placeholders.push(res.placeholder);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(subject = %subject, error = %e, "owner resolution failed");
                self.errors.push(CollectError::record(NAME, subject, e));
            }
        }
        self.records.push(w);
    }
}

/// Append placeholders whose identity no mapped record (or earlier placeholder) holds.
pub fn merge(records: Vec<Workload>, placeholders: Vec<Workload>) -> Vec<Workload> {
    let mut seen: FxHashSet<WorkloadId> = records.iter().map(Workload::id).collect();
    let mut out = records;
    for p in placeholders {
        if seen.insert(p.id()) {
            out.push(p);
        }
    }
    out
}

/// Map every object, resolve its root owner and merge in the placeholders.
pub async fn assemble(resolver: &OwnerResolver, objects: WorkloadObjects) -> (Vec<Workload>, Vec<CollectError>) {
    let mut acc = Assembly::default();
    for o in &objects.deployments {
        acc.add(resolver, o).await;
    }
    for o in &objects.stateful_sets {
        acc.add(resolver, o).await;
    }
    for o in &objects.replica_sets {
        acc.add(resolver, o).await;
    }
    for o in &objects.daemon_sets {
        acc.add(resolver, o).await;
    }
    for o in &objects.cron_jobs {
        acc.add(resolver, o).await;
    }
    for o in &objects.jobs {
        acc.add(resolver, o).await;
    }
    for o in &objects.pods {
        acc.add(resolver, o).await;
    }
    (merge(acc.records, acc.placeholders), acc.errors)
}

async fn list_kind<K>(api: Api<K>, page: Option<u32>, what: &str, handle: &ClusterHandle, errors: &mut Vec<CollectError>) -> Vec<K>
where
    K: Clone + DeserializeOwned + Debug + Send,
{
    match list_or_empty(&api, page, handle.timeout).await {
        Ok(items) => items,
        Err(e) => {
            errors.push(CollectError::domain(NAME, format!("listing {what}: {e}")));
            Vec::new()
        }
    }
}

/// Deployments, StatefulSets, ReplicaSets, DaemonSets, CronJobs, Jobs and Pods.
pub struct WorkloadsDomain {
    handle: ClusterHandle,
}

impl WorkloadsDomain {
    pub fn new(handle: ClusterHandle) -> Self {
        Self { handle }
    }

    async fn cron_jobs(&self, errors: &mut Vec<CollectError>) -> Vec<CronJobVariant> {
        let h = &self.handle;
        let v1: Vec<CronJob> = list_kind(Api::all(h.client.clone()), None, "CronJobs/v1", h, errors).await;
        if !v1.is_empty() {
            return v1.into_iter().map(CronJobVariant::V1).collect();
        }
        match h.catalog.find("batch/v1beta1", "CronJob") {
            Some((ar, _)) => {
                let api: Api<DynamicObject> = Api::all_with(h.client.clone(), ar);
                list_kind(api, None, "CronJobs/v1beta1", h, errors).await.into_iter().map(CronJobVariant::V1Beta1).collect()
            }
            None => Vec::new(),
        }
    }

    async fn list_objects(&self, errors: &mut Vec<CollectError>) -> WorkloadObjects {
        let h = &self.handle;
        let c = || h.client.clone();
        let mut objects = WorkloadObjects {
            deployments: list_kind(Api::all(c()), None, "Deployments", h, errors).await,
            stateful_sets: list_kind(Api::all(c()), None, "StatefulSets", h, errors).await,
            replica_sets: list_kind(Api::all(c()), None, "ReplicaSets", h, errors).await,
            daemon_sets: list_kind(Api::all(c()), None, "DaemonSets", h, errors).await,
            ..Default::default()
        };
        objects.cron_jobs = self.cron_jobs(errors).await;
        let jobs: Vec<Job> = list_kind(Api::all(c()), Some(PAGE_SIZE), "Jobs", h, errors).await;
        objects.jobs = jobs.into_iter().filter(|j| !owned_by_cron_job(&j.metadata)).collect();
        objects.pods = list_kind(Api::all(c()), Some(PAGE_SIZE), "Pods", h, errors).await;
        objects
    }
}

#[async_trait::async_trait]
impl Domain for WorkloadsDomain {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn collect(&self, inv: &mut Inventory) -> Vec<CollectError> {
        let mut errors = Vec::new();
        let objects = self.list_objects(&mut errors).await;
        let resolver = OwnerResolver::new(Arc::new(self.handle.fetcher()));
        let (workloads, mapping_errors) = assemble(&resolver, objects).await;
        errors.extend(mapping_errors);
        inv.workloads = workloads;
        info!(count = inv.workloads.len(), errors = errors.len(), "workloads collected");
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::{api::batch::v1::JobTemplateSpec, apimachinery::pkg::apis::meta::v1::OwnerReference};

    fn meta(name: &str) -> K8sMeta {
        K8sMeta { name: Some(name.into()), namespace: Some("ns".into()), ..Default::default() }
    }

    #[test]
    fn merge_prefers_mapped_records_and_dedups_placeholders() {
        let mapped = CronJobVariant::V1(CronJob { metadata: meta("nightly"), ..Default::default() }).to_workload().unwrap();
        let mut placeholder = mapped.clone();
        placeholder.spec = json!({});
        let other = Workload::placeholder(TypeMeta::new("argoproj.io", "v1alpha1", "Rollout"), object_meta(&meta("ro")));
        let merged = merge(vec![mapped.clone()], vec![placeholder, other.clone(), other.clone()]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], mapped);
        assert_eq!(merged[1].id(), other.id());
    }

    #[test]
    fn cron_job_variants_normalize_to_one_shape() {
        let spec = CronJobSpec {
            schedule: "0 3 * * *".into(),
            job_template: JobTemplateSpec::default(),
            ..Default::default()
        };
        let v1 = CronJobVariant::V1(CronJob { metadata: meta("nightly"), spec: Some(spec.clone()), ..Default::default() });
        let beta = CronJobVariant::V1Beta1(DynamicObject {
            types: None,
            metadata: meta("nightly"),
            data: json!({ "spec": serde_json::to_value(&spec).unwrap() }),
        });
        let a = v1.to_workload().unwrap();
        let b = beta.to_workload().unwrap();
        assert_eq!(a.type_meta.api_version, "v1");
        assert_eq!(b.type_meta.api_version, "v1beta1");
        assert_eq!(a.spec, b.spec);
        assert_eq!(b.spec["schedule"], "0 3 * * *");
    }

    #[test]
    fn v1beta1_without_spec_is_a_mapping_error() {
        let beta = CronJobVariant::V1Beta1(DynamicObject { types: None, metadata: meta("x"), data: json!({}) });
        assert!(beta.to_workload().is_err());
    }

    #[test]
    fn jobs_under_cron_jobs_are_detected() {
        let mut m = meta("nightly-123");
        m.owner_references = Some(vec![OwnerReference { kind: "CronJob".into(), name: "nightly".into(), ..Default::default() }]);
        assert!(owned_by_cron_job(&m));
        assert!(!owned_by_cron_job(&meta("adhoc")));
    }

    #[test]
    fn pods_are_core_group() {
        let w = Pod { metadata: meta("p"), ..Default::default() }.to_workload().unwrap();
        assert_eq!(w.type_meta.api_group, "core");
        assert_eq!(w.type_meta.resource_type, "pod");
        assert_eq!(w.spec["host_network"], false);
    }
}
