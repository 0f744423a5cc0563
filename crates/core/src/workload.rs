use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Group name recorded for the legacy core API group (`""` on the wire).
pub const CORE_GROUP: &str = "core";

fn normalize_group(group: &str) -> String {
    if group.is_empty() { CORE_GROUP.to_string() } else { group.to_string() }
}

/// Common object metadata carried by every record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub controller: bool,
}

/// Kind information of a workload record. `api_group` is never empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeMeta {
    pub kind: String,
    pub api_group: String,
    pub api_version: String,
    pub resource_type: String,
}

impl TypeMeta {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            api_group: normalize_group(group),
            api_version: version.to_string(),
            resource_type: kind.to_lowercase(),
        }
    }
}

/// Terminal ancestor of an ownership chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootOwner {
    pub kind: String,
    pub api_group: String,
    pub api_version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl RootOwner {
    pub fn id(&self) -> WorkloadId {
        WorkloadId {
            group: normalize_group(&self.api_group),
            version: self.api_version.clone(),
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// Identity of a workload record; unique within one inventory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadId {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{} {}/{}", self.group, self.version, self.kind, ns, self.name),
            None => write!(f, "{}/{}/{} {}", self.group, self.version, self.kind, self.name),
        }
    }
}

/// Canonical workload record. Spec and status are kind-specific documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(flatten)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_owner: Option<RootOwner>,
}

impl Workload {
    /// Placeholder for an owner that no mapper enumerated: metadata only, empty spec/status.
    pub fn placeholder(type_meta: TypeMeta, meta: ObjectMeta) -> Self {
        Self {
            type_meta,
            meta,
            spec: serde_json::Value::Object(Default::default()),
            status: serde_json::Value::Object(Default::default()),
            root_owner: None,
        }
    }

    pub fn id(&self) -> WorkloadId {
        WorkloadId {
            group: self.type_meta.api_group.clone(),
            version: self.type_meta.api_version.clone(),
            kind: self.type_meta.kind.clone(),
            namespace: self.meta.namespace.clone(),
            name: self.meta.name.clone(),
        }
    }
}
