//! In-memory cluster used by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sweeper::{
    CleanupTarget, ClusterClient, ClusterError, ContainerState, DeleteOutcome, ResourceKind,
};

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
}

type Key = (ResourceKind, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, CleanupTarget>,
    failing_lists: BTreeSet<ResourceKind>,
    failing_deletes: BTreeSet<String>,
    /// Names removed by someone else between list and delete
    vanishing: BTreeSet<String>,
    list_calls: Vec<(ResourceKind, Option<String>)>,
}

#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, target: CleanupTarget) {
        let key = (target.kind, target.namespace.clone(), target.name.clone());
        self.state.lock().unwrap().objects.insert(key, target);
    }

    pub fn fail_list(&self, kind: ResourceKind) {
        self.state.lock().unwrap().failing_lists.insert(kind);
    }

    pub fn fail_delete(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(name.to_string());
    }

    pub fn vanish_before_delete(&self, name: &str) {
        self.state.lock().unwrap().vanishing.insert(name.to_string());
    }

    pub fn contains(&self, kind: ResourceKind, namespace: &str, name: &str) -> bool {
        self.state.lock().unwrap().objects.contains_key(&(
            kind,
            namespace.to_string(),
            name.to_string(),
        ))
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    pub fn list_calls(&self) -> Vec<(ResourceKind, Option<String>)> {
        self.state.lock().unwrap().list_calls.clone()
    }
}

fn matches_selector(target: &CleanupTarget, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => target.labels.get(key).is_some_and(|v| v == value),
            None => target.labels.contains_key(term),
        })
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: Option<String>,
    ) -> Result<Vec<CleanupTarget>, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls.push((kind, label_selector.clone()));
        if state.failing_lists.contains(&kind) {
            return Err(ClusterError::Other(format!("cannot list {kind}")));
        }

        Ok(state
            .objects
            .values()
            .filter(|t| t.kind == kind && t.namespace == namespace)
            .filter(|t| {
                label_selector
                    .as_deref()
                    .is_none_or(|selector| matches_selector(t, selector))
            })
            .cloned()
            .collect())
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<DeleteOutcome, ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_deletes.contains(name) {
            return Err(ClusterError::Other(format!("forbidden: {name}")));
        }

        let key = (kind, namespace.to_string(), name.to_string());
        if state.vanishing.remove(name) {
            state.objects.remove(&key);
        }
        match state.objects.remove(&key) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::NotFound),
        }
    }
}

pub fn marked(target: CleanupTarget) -> CleanupTarget {
    target.with_label("mark", "cleanup")
}

pub fn succeeded_job(name: &str, completed_ago: Duration) -> CleanupTarget {
    let mut job = marked(CleanupTarget::new(ResourceKind::Job, name, "thoth"))
        .with_created_at(now() - completed_ago - Duration::minutes(5));
    job.status.succeeded = Some(1);
    job.status.completed_at = Some(now() - completed_ago);
    job
}

pub fn succeeded_pod(name: &str, finished_ago: &[Duration]) -> CleanupTarget {
    let mut pod = marked(CleanupTarget::new(ResourceKind::Pod, name, "thoth"));
    pod.status.phase = Some("Succeeded".to_string());
    pod.status.containers = finished_ago
        .iter()
        .enumerate()
        .map(|(i, ago)| ContainerState::terminated(&format!("c{i}"), Some(now() - *ago)))
        .collect();
    pod
}

pub fn created(kind: ResourceKind, name: &str, age: Duration) -> CleanupTarget {
    marked(CleanupTarget::new(kind, name, "thoth")).with_created_at(now() - age)
}

pub fn finished_workflow(name: &str, finished_ago: Option<Duration>) -> CleanupTarget {
    let mut workflow = CleanupTarget::new(ResourceKind::Workflow, name, "thoth")
        .with_created_at(now() - Duration::days(60));
    workflow.status.completed_at = finished_ago.map(|ago| now() - ago);
    workflow
}
