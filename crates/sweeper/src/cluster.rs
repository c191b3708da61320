//! Cluster access: list and delete cleanup targets
//!
//! [`ClusterClient`] is the seam the sweeper talks through. [`KubeCluster`]
//! implements it on top of `kube`, using typed APIs for core kinds and
//! dynamic APIs for OpenShift and Argo kinds.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PropagationPolicy};
use kube::core::ObjectList;
use kube::{Client, Error as KubeError};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::kinds::ResourceKind;
use crate::target::CleanupTarget;

/// Objects requested per list page
pub const LIST_PAGE_SIZE: u32 = 500;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] KubeError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("{0}")]
    Other(String),
}

/// Result of a delete request that reached the API server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Already gone, e.g. removed by the garbage collector
    NotFound,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List objects of `kind` in `namespace`, optionally filtered by a label
    /// selector.
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: Option<String>,
    ) -> Result<Vec<CleanupTarget>, ClusterError>;

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<DeleteOutcome, ClusterError>;
}

/// `kube`-backed cluster client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    request_timeout: Duration,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    /// Connect using in-cluster or kubeconfig configuration.
    pub async fn try_default(request_timeout: Duration) -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, request_timeout))
    }

    async fn bounded<T, F>(&self, operation: String, fut: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, KubeError>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(ClusterError::Kube),
            Err(_) => Err(ClusterError::Timeout {
                operation,
                timeout: self.request_timeout,
            }),
        }
    }

    async fn list_all<K>(
        &self,
        api: &Api<K>,
        kind: ResourceKind,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, ClusterError>
    where
        K: Clone + DeserializeOwned + std::fmt::Debug,
    {
        let mut params = ListParams::default().limit(LIST_PAGE_SIZE);
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }

        let mut items = Vec::new();
        loop {
            let page: ObjectList<K> = self
                .bounded(format!("list {kind}"), api.list(&params))
                .await?;
            let next = page.metadata.continue_.clone().filter(|c| !c.is_empty());
            items.extend(page.items);

            match next {
                Some(token) => {
                    debug!(kind = %kind, fetched = items.len(), "Fetching next list page");
                    params = params.continue_token(&token);
                }
                None => break,
            }
        }
        Ok(items)
    }

    async fn delete_named<K>(
        &self,
        api: &Api<K>,
        kind: ResourceKind,
        name: &str,
    ) -> Result<DeleteOutcome, ClusterError>
    where
        K: Clone + DeserializeOwned + std::fmt::Debug,
    {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..DeleteParams::default()
        };
        let operation = format!("delete {kind} {name}");
        match self.bounded(operation, api.delete(name, &params)).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(ClusterError::Kube(KubeError::Api(response))) if response.code == 404 => {
                Ok(DeleteOutcome::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    fn dynamic_api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            namespace,
            &kind.descriptor().api_resource(),
        )
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: Option<String>,
    ) -> Result<Vec<CleanupTarget>, ClusterError> {
        let selector = label_selector.as_deref();
        let targets = match kind {
            ResourceKind::Pod => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                self.list_all(&api, kind, selector)
                    .await?
                    .iter()
                    .map(|pod| CleanupTarget::from_pod(pod, namespace))
                    .collect()
            }
            ResourceKind::Job => {
                let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
                self.list_all(&api, kind, selector)
                    .await?
                    .iter()
                    .map(|job| CleanupTarget::from_job(job, namespace))
                    .collect()
            }
            ResourceKind::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                self.list_all(&api, kind, selector)
                    .await?
                    .iter()
                    .map(|cm| CleanupTarget::from_config_map(cm, namespace))
                    .collect()
            }
            ResourceKind::BuildConfig | ResourceKind::ImageStream | ResourceKind::Workflow => {
                let api = self.dynamic_api(kind, namespace);
                self.list_all(&api, kind, selector)
                    .await?
                    .iter()
                    .map(|object| CleanupTarget::from_dynamic(kind, object, namespace))
                    .collect()
            }
        };
        Ok(targets)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<DeleteOutcome, ClusterError> {
        match kind {
            ResourceKind::Pod => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                self.delete_named(&api, kind, name).await
            }
            ResourceKind::Job => {
                let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
                self.delete_named(&api, kind, name).await
            }
            ResourceKind::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                self.delete_named(&api, kind, name).await
            }
            ResourceKind::BuildConfig | ResourceKind::ImageStream | ResourceKind::Workflow => {
                let api = self.dynamic_api(kind, namespace);
                self.delete_named(&api, kind, name).await
            }
        }
    }
}
