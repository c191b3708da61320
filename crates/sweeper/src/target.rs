//! Cleanup targets
//!
//! Cluster objects of every kind are flattened into a [`CleanupTarget`] at the
//! listing boundary, so the evaluator never touches API types directly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::DynamicObject;
use serde_json::Value;

use crate::kinds::ResourceKind;

/// Label that groups objects by owning component for metrics
pub const LABEL_COMPONENT: &str = "component";

/// Annotation that exempts an object from sweeping
pub const ANNOTATION_PRESERVE: &str = "sweeper.cto.dev/preserve";

/// Component value used when an object has no component label
pub const UNKNOWN_COMPONENT: &str = "unknown";

/// Termination state of a single pod container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    /// Waiting or running
    Active { name: String },
    Terminated {
        name: String,
        finished_at: Option<DateTime<Utc>>,
    },
}

impl ContainerState {
    #[must_use]
    pub fn active(name: &str) -> Self {
        Self::Active {
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn terminated(name: &str, finished_at: Option<DateTime<Utc>>) -> Self {
        Self::Terminated {
            name: name.to_string(),
            finished_at,
        }
    }
}

/// Kind-specific status fields relevant to expiry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetStatus {
    /// Pod phase
    pub phase: Option<String>,
    /// Job succeeded count
    pub succeeded: Option<i32>,
    /// Job completion time or workflow finish time
    pub completed_at: Option<DateTime<Utc>>,
    /// Pod container states
    pub containers: Vec<ContainerState>,
}

/// One cluster object under consideration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupTarget {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub status: TargetStatus,
}

impl CleanupTarget {
    #[must_use]
    pub fn new(kind: ResourceKind, name: &str, namespace: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            created_at: None,
            status: TargetStatus::default(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Component label value, or `unknown`
    #[must_use]
    pub fn component(&self) -> &str {
        self.labels
            .get(LABEL_COMPONENT)
            .map_or(UNKNOWN_COMPONENT, String::as_str)
    }

    #[must_use]
    pub fn is_preserved(&self) -> bool {
        self.annotations
            .get(ANNOTATION_PRESERVE)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    fn from_meta(kind: ResourceKind, meta: &ObjectMeta, fallback_namespace: &str) -> Self {
        Self {
            kind,
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta
                .namespace
                .clone()
                .unwrap_or_else(|| fallback_namespace.to_string()),
            labels: meta.labels.clone().unwrap_or_default(),
            annotations: meta.annotations.clone().unwrap_or_default(),
            created_at: meta.creation_timestamp.as_ref().map(|t| t.0),
            status: TargetStatus::default(),
        }
    }

    #[must_use]
    pub fn from_pod(pod: &Pod, namespace: &str) -> Self {
        let mut target = Self::from_meta(ResourceKind::Pod, &pod.metadata, namespace);
        if let Some(status) = &pod.status {
            target.status.phase.clone_from(&status.phase);
            target.status.containers = status
                .container_statuses
                .iter()
                .flatten()
                .map(|cs| {
                    match cs.state.as_ref().and_then(|state| state.terminated.as_ref()) {
                        Some(terminated) => ContainerState::terminated(
                            &cs.name,
                            terminated.finished_at.as_ref().map(time_to_utc),
                        ),
                        None => ContainerState::active(&cs.name),
                    }
                })
                .collect();
        }
        target
    }

    #[must_use]
    pub fn from_job(job: &Job, namespace: &str) -> Self {
        let mut target = Self::from_meta(ResourceKind::Job, &job.metadata, namespace);
        if let Some(status) = &job.status {
            target.status.succeeded = status.succeeded;
            target.status.completed_at = status.completion_time.as_ref().map(time_to_utc);
        }
        target
    }

    #[must_use]
    pub fn from_config_map(config_map: &ConfigMap, namespace: &str) -> Self {
        Self::from_meta(ResourceKind::ConfigMap, &config_map.metadata, namespace)
    }

    /// Flatten a dynamically typed object (OpenShift and Argo kinds).
    #[must_use]
    pub fn from_dynamic(kind: ResourceKind, object: &DynamicObject, namespace: &str) -> Self {
        let mut target = Self::from_meta(kind, &object.metadata, namespace);
        let status = object.data.get("status");
        target.status.phase = status
            .and_then(|s| s.get("phase"))
            .and_then(Value::as_str)
            .map(str::to_string);
        target.status.completed_at = status
            .and_then(|s| s.get("finishedAt"))
            .and_then(Value::as_str)
            .and_then(parse_timestamp);
        target
    }
}

fn time_to_utc(time: &Time) -> DateTime<Utc> {
    time.0
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
