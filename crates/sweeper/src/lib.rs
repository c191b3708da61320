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

//! TTL sweeper core library
//!
//! Removes expired pods, jobs, build configs, image streams, config maps and
//! workflows from a namespace in a single bounded pass. Each kind carries its
//! own readiness predicate and age anchor; objects may override the default
//! TTL with a `ttl` label.

pub mod cluster;
pub mod config;
pub mod evaluator;
pub mod kinds;
pub mod metrics;
pub mod sweeper;
pub mod target;
pub mod ttl;

// Re-export commonly used types
pub use cluster::{ClusterClient, ClusterError, DeleteOutcome, KubeCluster};
pub use config::{ConfigError, Settings, SweeperConfig};
pub use evaluator::{evaluate, Evaluation};
pub use kinds::{AgeAnchor, KindDescriptor, ResourceKind};
pub use metrics::{MetricsSink, OtlpMetricsSink, Outcome, OutcomeCounters};
pub use sweeper::{flush_metrics, KindReport, PassOutput, PassReport, Sweeper};
pub use target::{CleanupTarget, ContainerState, TargetStatus};
pub use ttl::{parse_duration, TtlError, TtlPolicy};
