//! kinv collect: resource mappers, the owner resolution engine and the
//! collection orchestrator that ties them into one snapshot per cycle.

#![forbid(unsafe_code)]

use std::fmt;

use kinv_core::Inventory;

pub mod domains;
mod guard;
mod meta;
pub mod orchestrator;
pub mod owners;
pub mod quantity;
pub mod source;

pub use guard::map_guarded;
pub use meta::object_meta;
pub use orchestrator::{parse_interval, CycleOutcome, Orchestrator, DEFAULT_INTERVAL};
pub use owners::{OwnerResolver, Resolution, ResolveError, MAX_HOPS};
pub use source::KubeDomains;

/// One non-fatal failure inside a domain; rendered into `Inventory.collection_errors`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectError {
    pub domain: &'static str,
    pub subject: Option<String>,
    pub message: String,
}

impl CollectError {
    pub fn domain(domain: &'static str, message: impl ToString) -> Self {
        Self { domain, subject: None, message: message.to_string() }
    }

    pub fn record(domain: &'static str, subject: impl Into<String>, message: impl ToString) -> Self {
        Self { domain, subject: Some(subject.into()), message: message.to_string() }
    }
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(s) => write!(f, "{}: {}: {}", self.domain, s, self.message),
            None => write!(f, "{}: {}", self.domain, self.message),
        }
    }
}

impl std::error::Error for CollectError {}

/// One resource-mapper domain. Writes its records into the snapshot and
/// returns every error it hit; never aborts on the first one.
#[async_trait::async_trait]
pub trait Domain: Send + Sync {
    fn name(&self) -> &'static str;
    async fn collect(&self, inv: &mut Inventory) -> Vec<CollectError>;
}

/// Acquires a cluster handle and yields the domains to run, in collection order.
#[async_trait::async_trait]
pub trait DomainSource: Send + Sync {
    async fn acquire(&self) -> anyhow::Result<Vec<Box<dyn Domain>>>;
}
