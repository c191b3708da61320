//! Cleanup orchestration
//!
//! A pass walks [`ResourceKind::SWEEP_ORDER`] over one namespace. Errors are
//! contained at the smallest enclosing unit: a failed delete affects one
//! object, a failed list affects one kind, and nothing aborts the pass.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cluster::{ClusterClient, ClusterError, DeleteOutcome};
use crate::evaluator::{evaluate, Evaluation};
use crate::kinds::ResourceKind;
use crate::metrics::{MetricsSink, Outcome, OutcomeCounters};
use crate::ttl::{format_duration, TtlPolicy};

/// Source of the current time; captured once per kind
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Per-kind breakdown of a pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindReport {
    pub listed: usize,
    pub not_ready: usize,
    pub preserved: usize,
    pub invalid_ttl: usize,
    pub missing_anchor: usize,
    /// Everything evaluated but not deleted, including skips and failed deletes
    pub kept: usize,
    pub deleted: usize,
    /// Subset of `deleted` that was already gone
    pub not_found: usize,
    pub delete_failures: usize,
    pub would_delete: usize,
    pub list_failed: bool,
}

impl KindReport {
    /// Objects that passed the readiness gate
    #[must_use]
    pub fn evaluated(&self) -> usize {
        self.listed - self.not_ready - self.preserved
    }
}

/// Summary of a full pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub namespace: String,
    pub dry_run: bool,
    pub cancelled: bool,
    pub kinds: BTreeMap<ResourceKind, KindReport>,
}

impl PassReport {
    #[must_use]
    pub fn kind(&self, kind: ResourceKind) -> Option<&KindReport> {
        self.kinds.get(&kind)
    }

    #[must_use]
    pub fn total_deleted(&self) -> usize {
        self.kinds.values().map(|k| k.deleted).sum()
    }

    #[must_use]
    pub fn total_listed(&self) -> usize {
        self.kinds.values().map(|k| k.listed).sum()
    }
}

/// Everything a finished pass produced
#[derive(Debug, Clone)]
pub struct PassOutput {
    pub report: PassReport,
    pub counters: OutcomeCounters,
    pub runtime: Duration,
}

/// One-shot TTL sweeper over a namespace
pub struct Sweeper<C> {
    cluster: C,
    ttl_policy: TtlPolicy,
    label_selector: String,
    dry_run: bool,
    clock: Clock,
}

impl<C: ClusterClient> Sweeper<C> {
    pub fn new(cluster: C, ttl_policy: TtlPolicy, label_selector: impl Into<String>) -> Self {
        Self {
            cluster,
            ttl_policy,
            label_selector: label_selector.into(),
            dry_run: false,
            clock: Arc::new(Utc::now),
        }
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run every kind handler over `namespace`. Cancellation is honoured
    /// between kinds only.
    #[instrument(skip(self, cancel), fields(namespace = %namespace, dry_run = self.dry_run))]
    pub async fn run(&self, namespace: &str, cancel: &CancellationToken) -> PassOutput {
        let started = Instant::now();
        let mut counters = OutcomeCounters::new();
        let mut report = PassReport {
            namespace: namespace.to_string(),
            dry_run: self.dry_run,
            ..PassReport::default()
        };

        info!("Starting cleanup pass");

        for kind in ResourceKind::SWEEP_ORDER {
            if cancel.is_cancelled() {
                warn!(next_kind = %kind, "Cleanup pass cancelled, skipping remaining kinds");
                report.cancelled = true;
                break;
            }

            let mut kind_report = KindReport::default();
            if let Err(e) = self
                .sweep_kind(namespace, kind, &mut counters, &mut kind_report)
                .await
            {
                error!(kind = %kind, error = %e, "Failed to list objects, skipping kind");
                kind_report.list_failed = true;
            }
            report.kinds.insert(kind, kind_report);
        }

        let runtime = started.elapsed();
        info!(
            listed = report.total_listed(),
            deleted = report.total_deleted(),
            runtime_ms = runtime.as_millis() as u64,
            cancelled = report.cancelled,
            "Cleanup pass finished"
        );

        PassOutput {
            report,
            counters,
            runtime,
        }
    }

    #[instrument(skip(self, counters, report), fields(kind = %kind))]
    async fn sweep_kind(
        &self,
        namespace: &str,
        kind: ResourceKind,
        counters: &mut OutcomeCounters,
        report: &mut KindReport,
    ) -> Result<(), ClusterError> {
        let descriptor = kind.descriptor();
        let selector = descriptor
            .label_filtered
            .then(|| self.label_selector.clone());

        let targets = self.cluster.list(kind, namespace, selector).await?;
        report.listed = targets.len();
        info!(count = targets.len(), "Listed {} objects", kind);

        let now = (self.clock)();

        for target in &targets {
            let name = target.name.as_str();
            let component = target.component();
            let evaluation = evaluate(target, &self.ttl_policy, now);

            match &evaluation {
                Evaluation::Preserved => {
                    debug!(name = %name, "Object is marked preserved, skipping");
                    report.preserved += 1;
                }
                Evaluation::NotReady => {
                    info!(name = %name, "Object is not finished/not successful, skipping");
                    report.not_ready += 1;
                }
                Evaluation::InvalidTtl { raw, error } => {
                    warn!(name = %name, ttl = %raw, error = %error, "Invalid TTL label, skipping object");
                    report.invalid_ttl += 1;
                }
                Evaluation::MissingAnchor => {
                    warn!(
                        name = %name,
                        anchor = ?descriptor.anchor,
                        "Object has no timestamp to measure age from, skipping"
                    );
                    report.missing_anchor += 1;
                }
                Evaluation::Keep { age, ttl } => {
                    info!(
                        name = %name,
                        age = %format_duration(*age),
                        ttl = %format_duration(*ttl),
                        "Keeping object, TTL not reached"
                    );
                }
                Evaluation::Expired { .. } => {}
            }

            if !evaluation.is_counted() {
                continue;
            }

            let outcome = match evaluation {
                Evaluation::Expired { age, ttl } => {
                    self.delete_expired(namespace, kind, name, age, ttl, report)
                        .await
                }
                _ => Outcome::Kept,
            };
            if outcome == Outcome::Kept {
                report.kept += 1;
            }
            counters.increment(namespace, component, kind, outcome);
        }

        Ok(())
    }

    async fn delete_expired(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        age: chrono::Duration,
        ttl: chrono::Duration,
        report: &mut KindReport,
    ) -> Outcome {
        let age = format_duration(age);
        let ttl = format_duration(ttl);

        if self.dry_run {
            info!(name = %name, age = %age, ttl = %ttl, "Dry run: would delete expired object");
            report.would_delete += 1;
            return Outcome::Kept;
        }

        match self.cluster.delete(kind, namespace, name).await {
            Ok(DeleteOutcome::Deleted) => {
                info!(name = %name, age = %age, ttl = %ttl, "Deleted expired object");
                report.deleted += 1;
                Outcome::Deleted
            }
            Ok(DeleteOutcome::NotFound) => {
                warn!(name = %name, "Expired object was already gone");
                report.deleted += 1;
                report.not_found += 1;
                Outcome::Deleted
            }
            Err(e) => {
                error!(
                    name = %name,
                    kind = %kind,
                    namespace = %namespace,
                    error = %e,
                    "Failed to delete expired object, error is not fatal"
                );
                report.delete_failures += 1;
                Outcome::Kept
            }
        }
    }
}

/// Hand the counters of a pass to `sink`. Failures are logged only.
pub fn flush_metrics(sink: Option<&dyn MetricsSink>, output: &PassOutput) {
    let Some(sink) = sink else {
        debug!("No metrics endpoint configured, skipping metrics flush");
        return;
    };

    if let Err(e) = sink.flush(&output.report.namespace, &output.counters, output.runtime) {
        error!(error = %e, "Failed to flush cleanup metrics");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterClient;
    use crate::target::CleanupTarget;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn old_config_map(name: &str) -> CleanupTarget {
        CleanupTarget::new(ResourceKind::ConfigMap, name, "thoth")
            .with_label("component", "solver")
            .with_created_at(now() - chrono::Duration::days(30))
    }

    fn sweeper(mock: MockClusterClient) -> Sweeper<MockClusterClient> {
        Sweeper::new(mock, TtlPolicy::from_default("7d").unwrap(), "mark=cleanup")
            .with_clock(Arc::new(now))
    }

    fn empty_lists_except_config_maps(mock: &mut MockClusterClient, items: Vec<CleanupTarget>) {
        mock.expect_list()
            .withf(|kind, _, _| *kind == ResourceKind::ConfigMap)
            .returning(move |_, _, _| Ok(items.clone()));
        mock.expect_list()
            .withf(|kind, _, _| *kind != ResourceKind::ConfigMap)
            .returning(|_, _, _| Ok(Vec::new()));
    }

    #[tokio::test]
    async fn test_delete_failure_does_not_stop_siblings() {
        let mut mock = MockClusterClient::new();
        empty_lists_except_config_maps(
            &mut mock,
            vec![old_config_map("a"), old_config_map("b"), old_config_map("c")],
        );
        mock.expect_delete()
            .withf(|kind, namespace, name| {
                *kind == ResourceKind::ConfigMap && namespace == "thoth" && name == "a"
            })
            .times(1)
            .returning(|_, _, _| Err(ClusterError::Other("forbidden".to_string())));
        mock.expect_delete()
            .withf(|kind, namespace, name| {
                *kind == ResourceKind::ConfigMap && namespace == "thoth" && name == "b"
            })
            .times(1)
            .returning(|_, _, _| Ok(DeleteOutcome::NotFound));
        mock.expect_delete()
            .withf(|kind, namespace, name| {
                *kind == ResourceKind::ConfigMap && namespace == "thoth" && name == "c"
            })
            .times(1)
            .returning(|_, _, _| Ok(DeleteOutcome::Deleted));

        let output = sweeper(mock).run("thoth", &CancellationToken::new()).await;
        let report = output.report.kind(ResourceKind::ConfigMap).unwrap();

        assert_eq!(report.listed, 3);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.not_found, 1);
        assert_eq!(report.delete_failures, 1);
        assert_eq!(report.kept, 1);
        assert_eq!(
            output.counters.total(ResourceKind::ConfigMap, Outcome::Deleted),
            2
        );
        assert_eq!(
            output.counters.total(ResourceKind::ConfigMap, Outcome::Kept),
            1
        );
    }

    #[tokio::test]
    async fn test_list_failure_is_contained_to_its_kind() {
        let mut mock = MockClusterClient::new();
        mock.expect_list()
            .withf(|kind, _, _| *kind == ResourceKind::Job)
            .returning(|_, _, _| Err(ClusterError::Other("connection reset".to_string())));
        mock.expect_list()
            .withf(|kind, _, _| *kind == ResourceKind::ConfigMap)
            .returning(|_, _, _| Ok(vec![old_config_map("stale")]));
        mock.expect_list()
            .withf(|kind, _, _| {
                !matches!(kind, ResourceKind::Job | ResourceKind::ConfigMap)
            })
            .returning(|_, _, _| Ok(Vec::new()));
        mock.expect_delete()
            .returning(|_, _, _| Ok(DeleteOutcome::Deleted));

        let output = sweeper(mock).run("thoth", &CancellationToken::new()).await;

        assert!(output.report.kind(ResourceKind::Job).unwrap().list_failed);
        assert_eq!(
            output.report.kind(ResourceKind::ConfigMap).unwrap().deleted,
            1
        );
        assert_eq!(output.report.kinds.len(), ResourceKind::SWEEP_ORDER.len());
    }

    #[tokio::test]
    async fn test_label_selector_applies_to_all_but_workflows() {
        let mut mock = MockClusterClient::new();
        mock.expect_list()
            .withf(|kind, namespace, selector| {
                namespace == "thoth"
                    && if *kind == ResourceKind::Workflow {
                        selector.is_none()
                    } else {
                        selector.as_deref() == Some("mark=cleanup")
                    }
            })
            .times(ResourceKind::SWEEP_ORDER.len())
            .returning(|_, _, _| Ok(Vec::new()));

        let output = sweeper(mock).run("thoth", &CancellationToken::new()).await;
        assert_eq!(output.report.total_listed(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_never_deletes() {
        let mut mock = MockClusterClient::new();
        empty_lists_except_config_maps(&mut mock, vec![old_config_map("a")]);
        mock.expect_delete().never();

        let output = sweeper(mock)
            .with_dry_run(true)
            .run("thoth", &CancellationToken::new())
            .await;
        let report = output.report.kind(ResourceKind::ConfigMap).unwrap();
        assert_eq!(report.would_delete, 1);
        assert_eq!(report.deleted, 0);
        assert!(output.report.dry_run);
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_all_kinds() {
        let mut mock = MockClusterClient::new();
        mock.expect_list().never();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let output = sweeper(mock).run("thoth", &cancel).await;
        assert!(output.report.cancelled);
        assert!(output.report.kinds.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_first_kind_finishes_it_and_stops() {
        let cancel = CancellationToken::new();
        let mut job = CleanupTarget::new(ResourceKind::Job, "done", "thoth");
        job.status.succeeded = Some(1);
        job.status.completed_at = Some(now() - chrono::Duration::days(30));

        let mut mock = MockClusterClient::new();
        let signal = cancel.clone();
        mock.expect_list()
            .withf(|kind, _, _| *kind == ResourceKind::Job)
            .times(1)
            .returning(move |_, _, _| {
                signal.cancel();
                Ok(vec![job.clone()])
            });
        mock.expect_list()
            .withf(|kind, _, _| *kind != ResourceKind::Job)
            .never();
        mock.expect_delete()
            .withf(|kind, _, name| *kind == ResourceKind::Job && name == "done")
            .times(1)
            .returning(|_, _, _| Ok(DeleteOutcome::Deleted));

        let output = sweeper(mock).run("thoth", &cancel).await;

        assert!(output.report.cancelled);
        assert_eq!(output.report.kinds.len(), 1);
        assert_eq!(output.report.kind(ResourceKind::Job).unwrap().deleted, 1);
        assert!(output.report.kind(ResourceKind::BuildConfig).is_none());
        assert_eq!(output.counters.total(ResourceKind::Job, Outcome::Deleted), 1);
    }

    struct FailingSink;

    impl MetricsSink for FailingSink {
        fn flush(
            &self,
            _namespace: &str,
            _counters: &OutcomeCounters,
            _runtime: Duration,
        ) -> Result<(), crate::metrics::MetricsError> {
            Err(crate::metrics::MetricsError::Flush("collector down".to_string()))
        }
    }

    #[test]
    fn test_flush_failure_is_not_fatal() {
        let output = PassOutput {
            report: PassReport::default(),
            counters: OutcomeCounters::new(),
            runtime: Duration::from_secs(1),
        };
        flush_metrics(Some(&FailingSink as &dyn MetricsSink), &output);
        flush_metrics(None, &output);
    }
}
