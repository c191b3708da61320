//! Resource kind descriptors
//!
//! Kind-specific behaviour lives in a static table consumed by the generic
//! evaluator: each descriptor names the API coordinates, the readiness
//! predicate and the age anchor for one kind.

use std::fmt;

use chrono::{DateTime, Utc};
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};

use crate::target::{CleanupTarget, ContainerState, TargetStatus};

/// Kinds swept by a cleanup pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Job,
    BuildConfig,
    ImageStream,
    ConfigMap,
    Pod,
    Workflow,
}

impl ResourceKind {
    /// Fixed handler order for a pass
    pub const SWEEP_ORDER: [ResourceKind; 6] = [
        ResourceKind::Job,
        ResourceKind::BuildConfig,
        ResourceKind::ImageStream,
        ResourceKind::ConfigMap,
        ResourceKind::Pod,
        ResourceKind::Workflow,
    ];

    #[must_use]
    pub fn descriptor(self) -> &'static KindDescriptor {
        match self {
            ResourceKind::Job => &JOB,
            ResourceKind::BuildConfig => &BUILD_CONFIG,
            ResourceKind::ImageStream => &IMAGE_STREAM,
            ResourceKind::ConfigMap => &CONFIG_MAP,
            ResourceKind::Pod => &POD,
            ResourceKind::Workflow => &WORKFLOW,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.descriptor().kind_name
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp an object's age is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeAnchor {
    /// `metadata.creationTimestamp`
    Created,
    /// Completion time for jobs, finish time for workflows
    Completed,
    /// Latest `finishedAt` across all terminated containers
    LastContainerFinished,
}

impl AgeAnchor {
    /// Resolve the anchor timestamp. `None` means the object lacks the field
    /// the anchor needs.
    #[must_use]
    pub fn resolve(self, target: &CleanupTarget) -> Option<DateTime<Utc>> {
        match self {
            AgeAnchor::Created => target.created_at,
            AgeAnchor::Completed => target.status.completed_at,
            AgeAnchor::LastContainerFinished => {
                let containers = &target.status.containers;
                if containers.is_empty() {
                    return None;
                }
                // Every container must contribute a finish time.
                containers
                    .iter()
                    .map(|container| match container {
                        ContainerState::Terminated { finished_at, .. } => *finished_at,
                        ContainerState::Active { .. } => None,
                    })
                    .try_fold(None::<DateTime<Utc>>, |latest, finished| {
                        let finished = finished?;
                        Some(Some(latest.map_or(finished, |l| l.max(finished))))
                    })
                    .flatten()
            }
        }
    }
}

/// Static description of one resource kind
pub struct KindDescriptor {
    pub kind: ResourceKind,
    pub kind_name: &'static str,
    pub group: &'static str,
    pub version: &'static str,
    pub plural: &'static str,
    /// Condition that must hold before the TTL is considered
    pub readiness: Option<fn(&TargetStatus) -> bool>,
    pub anchor: AgeAnchor,
    /// Whether listing is restricted by the cleanup label selector
    pub label_filtered: bool,
}

impl KindDescriptor {
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    #[must_use]
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.to_string(),
            version: self.version.to_string(),
            api_version: self.api_version(),
            kind: self.kind_name.to_string(),
            plural: self.plural.to_string(),
        }
    }

    #[must_use]
    pub fn is_ready(&self, status: &TargetStatus) -> bool {
        self.readiness.is_none_or(|ready| ready(status))
    }
}

impl fmt::Debug for KindDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindDescriptor")
            .field("kind", &self.kind)
            .field("api_version", &self.api_version())
            .field("plural", &self.plural)
            .field("anchor", &self.anchor)
            .field("label_filtered", &self.label_filtered)
            .finish_non_exhaustive()
    }
}

fn job_succeeded(status: &TargetStatus) -> bool {
    status.succeeded == Some(1)
}

fn pod_succeeded(status: &TargetStatus) -> bool {
    status.phase.as_deref() == Some("Succeeded")
        && status
            .containers
            .iter()
            .all(|container| matches!(container, ContainerState::Terminated { .. }))
}

fn workflow_finished(status: &TargetStatus) -> bool {
    status.completed_at.is_some()
}

static JOB: KindDescriptor = KindDescriptor {
    kind: ResourceKind::Job,
    kind_name: "Job",
    group: "batch",
    version: "v1",
    plural: "jobs",
    readiness: Some(job_succeeded),
    anchor: AgeAnchor::Completed,
    label_filtered: true,
};

static BUILD_CONFIG: KindDescriptor = KindDescriptor {
    kind: ResourceKind::BuildConfig,
    kind_name: "BuildConfig",
    group: "build.openshift.io",
    version: "v1",
    plural: "buildconfigs",
    readiness: None,
    anchor: AgeAnchor::Created,
    label_filtered: true,
};

static IMAGE_STREAM: KindDescriptor = KindDescriptor {
    kind: ResourceKind::ImageStream,
    kind_name: "ImageStream",
    group: "image.openshift.io",
    version: "v1",
    plural: "imagestreams",
    readiness: None,
    anchor: AgeAnchor::Created,
    label_filtered: true,
};

static CONFIG_MAP: KindDescriptor = KindDescriptor {
    kind: ResourceKind::ConfigMap,
    kind_name: "ConfigMap",
    group: "",
    version: "v1",
    plural: "configmaps",
    readiness: None,
    anchor: AgeAnchor::Created,
    label_filtered: true,
};

static POD: KindDescriptor = KindDescriptor {
    kind: ResourceKind::Pod,
    kind_name: "Pod",
    group: "",
    version: "v1",
    plural: "pods",
    readiness: Some(pod_succeeded),
    anchor: AgeAnchor::LastContainerFinished,
    label_filtered: true,
};

static WORKFLOW: KindDescriptor = KindDescriptor {
    kind: ResourceKind::Workflow,
    kind_name: "Workflow",
    group: "argoproj.io",
    version: "v1alpha1",
    plural: "workflows",
    readiness: Some(workflow_finished),
    anchor: AgeAnchor::Completed,
    label_filtered: false,
};
