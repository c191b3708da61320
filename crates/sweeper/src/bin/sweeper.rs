/*
 * 5D Labs Agent Platform - Workload TTL Sweeper
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Sweeper CLI - one-shot cleanup of expired workload artifacts
//!
//! Runs a single pass over a namespace and exits 0 once the pass completes,
//! even if individual deletions failed. Only startup errors exit non-zero.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sweeper::{
    flush_metrics, KubeCluster, MetricsSink, OtlpMetricsSink, Settings, Sweeper, SweeperConfig,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Remove expired pods, jobs, builds, image streams, config maps and workflows
#[derive(Parser)]
#[command(name = "sweeper")]
#[command(about = "Remove expired workload artifacts from a cluster namespace")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one cleanup pass over a namespace
    Cleanup(CleanupArgs),
}

#[derive(clap::Args)]
struct CleanupArgs {
    /// Namespace to sweep
    #[arg(long, env = "SWEEPER_NAMESPACE")]
    namespace: String,

    /// Enable debug logging
    #[arg(short, long, env = "SWEEPER_DEBUG")]
    verbose: bool,

    /// Optional YAML configuration file
    #[arg(long, env = "SWEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// TTL for objects without a `ttl` label (e.g. 7d, 12h)
    #[arg(long, env = "SWEEPER_DEFAULT_TTL")]
    default_ttl: Option<String>,

    /// Label selector for label-filtered kinds
    #[arg(long, env = "SWEEPER_LABEL_SELECTOR")]
    label_selector: Option<String>,

    /// OTLP/HTTP metrics endpoint; metrics are not exported when unset
    #[arg(long, env = "SWEEPER_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,

    /// Timeout for each list or delete call, in seconds
    #[arg(long, env = "SWEEPER_REQUEST_TIMEOUT_SECONDS")]
    request_timeout_seconds: Option<u64>,

    /// Log what would be deleted without deleting anything
    #[arg(long, env = "SWEEPER_DRY_RUN")]
    dry_run: bool,
}

impl CleanupArgs {
    /// Merge the optional config file with flag and environment overrides.
    fn settings(&self) -> Result<Settings> {
        let mut config = match &self.config {
            Some(path) => SweeperConfig::from_file(path)?,
            None => SweeperConfig::default(),
        };

        if let Some(ttl) = &self.default_ttl {
            config.default_ttl.clone_from(ttl);
        }
        if let Some(selector) = &self.label_selector {
            config.label_selector.clone_from(selector);
        }
        if let Some(endpoint) = &self.metrics_endpoint {
            config.metrics_endpoint = Some(endpoint.clone());
        }
        if let Some(timeout) = self.request_timeout_seconds {
            config.request_timeout_seconds = timeout;
        }
        config.dry_run |= self.dry_run;

        config
            .validate(&self.namespace)
            .context("Invalid sweeper configuration")
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, finishing current kind before stopping");
        },
        () = terminate => {
            info!("Received SIGTERM, finishing current kind before stopping");
        },
    }
}

async fn run_cleanup(args: &CleanupArgs) -> Result<()> {
    let settings = args.settings()?;
    info!(
        namespace = %settings.namespace,
        default_ttl = %sweeper::ttl::format_duration(settings.ttl_policy.default_ttl()),
        label_selector = %settings.label_selector,
        dry_run = settings.dry_run,
        "Starting sweeper v{}",
        env!("CARGO_PKG_VERSION")
    );

    let cluster = KubeCluster::try_default(settings.request_timeout)
        .await
        .context("Failed to create Kubernetes client")?;
    debug!("Connected to Kubernetes cluster");

    let cancel = CancellationToken::new();
    let signal_guard = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
    };

    let sweeper = Sweeper::new(
        cluster,
        settings.ttl_policy,
        settings.label_selector.clone(),
    )
    .with_dry_run(settings.dry_run);

    let output = sweeper.run(&settings.namespace, &cancel).await;
    signal_guard.abort();

    match serde_json::to_string(&output.report) {
        Ok(summary) => info!(report = %summary, "Cleanup summary"),
        Err(e) => warn!(error = %e, "Failed to serialize cleanup summary"),
    }

    // The OTLP exporter blocks, keep it off the async workers.
    let metrics_endpoint = settings.metrics_endpoint.clone();
    let request_timeout = settings.request_timeout;
    let flushed = tokio::task::spawn_blocking(move || {
        let sink = metrics_endpoint.as_deref().and_then(|endpoint| {
            OtlpMetricsSink::new(endpoint, request_timeout)
                .map_err(|e| {
                    error!(error = %e, "Metrics exporter unavailable, metrics will not be exported");
                })
                .ok()
        });
        flush_metrics(sink.as_ref().map(|s| s as &dyn MetricsSink), &output);
    })
    .await;
    if let Err(e) = flushed {
        warn!(error = %e, "Metrics flush task failed");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Cleanup(args) => {
            init_tracing(args.verbose, cli.log_format);
            run_cleanup(args).await
        }
    }
}
