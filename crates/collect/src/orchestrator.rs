//! The collection loop: acquire, collect every domain, publish, deliver, sleep.

use std::{
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::FutureExt;
use kinv_core::{Inventory, Publisher};
use kinv_store::SnapshotStore;
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use crate::{guard::describe_panic, CollectError, DomainSource};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Parse a humantime interval (`30m`, `1h`); anything unusable falls back to one hour.
pub fn parse_interval(s: &str) -> Duration {
    match humantime::parse_duration(s.trim()) {
        Ok(d) if !d.is_zero() => d,
        _ => {
            warn!(interval = s, "unparsable collect interval; using 1h");
            DEFAULT_INTERVAL
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No cluster handle; the previous records were republished as failed and nothing was delivered.
    AcquireFailed(String),
    Collected {
        succeeded: bool,
        errors: usize,
        /// `None` when delivery is disabled.
        delivered: Option<bool>,
    },
}

pub struct Orchestrator {
    source: Arc<dyn DomainSource>,
    store: Arc<SnapshotStore>,
    publisher: Option<Arc<dyn Publisher>>,
    interval: Duration,
    client_version: String,
}

impl Orchestrator {
    pub fn new(source: Arc<dyn DomainSource>, store: Arc<SnapshotStore>, interval: Duration) -> Self {
        Self { source, store, publisher: None, interval, client_version: env!("CARGO_PKG_VERSION").to_string() }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }

    /// Last snapshot's records, marked failed with only this cycle's error.
    fn failed_snapshot(&self, msg: &str) -> Inventory {
        let mut inv = (*self.store.current()).clone();
        inv.client_version.clone_from(&self.client_version);
        inv.collection_errors.clear();
        inv.record_error(CollectError::domain("cluster", format!("acquiring cluster handle: {msg}")));
        inv
    }

    /// One full cycle. Never panics out; every failure ends up in the outcome or the snapshot.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let started = Instant::now();
        counter!("collect_cycles_total", 1u64);

        let domains = match self.source.acquire().await {
            Ok(d) => d,
            Err(e) => {
                let msg = format!("{e:#}");
                counter!("collect_cycle_failed_total", 1u64);
                error!(error = %msg, "acquiring cluster handle; skipping cycle");
                self.store.publish(self.failed_snapshot(&msg));
                return CycleOutcome::AcquireFailed(msg);
            }
        };

        let mut inv = Inventory::new(&self.client_version);
        for domain in &domains {
            let name = domain.name();
            let t = Instant::now();
            let errors = match AssertUnwindSafe(domain.collect(&mut inv)).catch_unwind().await {
                Ok(errors) => errors,
                Err(payload) => vec![CollectError::domain(name, format!("domain panicked: {}", describe_panic(payload)))],
            };
            for e in &errors {
                warn!(domain = name, error = %e, "collection error");
                inv.record_error(e);
            }
            counter!("collect_errors_total", errors.len() as u64);
            debug!(domain = name, errors = errors.len(), took_ms = t.elapsed().as_millis() as u64, "domain collected");
        }

        let succeeded = inv.collection_succeeded;
        let error_count = inv.collection_errors.len();
        if !succeeded {
            counter!("collect_cycle_failed_total", 1u64);
        }
        let inv = Arc::new(inv);
        self.store.publish(Arc::clone(&inv));
        histogram!("collect_cycle_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(
            succeeded,
            errors = error_count,
            workloads = inv.workloads.len(),
            took_ms = started.elapsed().as_millis() as u64,
            "collection cycle complete"
        );

        let delivered = match &self.publisher {
            Some(p) => match p.publish(&inv).await {
                Ok(()) => Some(true),
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "inventory delivery failed");
                    Some(false)
                }
            },
            None => None,
        };
        CycleOutcome::Collected { succeeded, errors: error_count, delivered }
    }

    /// Run cycles forever, `interval` apart.
    pub async fn run(self) {
        info!(interval = %humantime::format_duration(self.interval), delivery = self.publisher.is_some(), "collection loop started");
        loop {
            self.run_cycle().await;
            tokio::time::sleep(self.interval).await;
        }
    }
}
