//! Transformation scheduler.
//!
//! Executes pipeline stages as an explicit dependency-ordered graph:
//! stages are topologically sorted, a stage runs only after every
//! dependency has succeeded, and dependents of a failed stage are skipped
//! rather than run against missing inputs. Transient failures are retried
//! with exponential backoff and jitter up to the configured attempt cap;
//! non-transient failures surface immediately. Every run persists a
//! summary, on success, failure and cancellation alike.
//!
//! Pipeline:
//! 1. load_raw          - Collector/Enricher output into the raw store
//! 2. build_dimensions  - channel + date dimensions from the raw store
//! 3. build_facts       - message + detection facts over the dimensions

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{error, info, warn};

use crate::context::RunContext;
use crate::db::Warehouse;
use crate::dimensions::DimensionBuilder;
use crate::error::{Result, WarehouseError};
use crate::facts::FactBuilder;
use crate::ingest;
use crate::loader::Loader;
use crate::metrics::MetricsCollector;
use crate::models::{RunStatus, RunSummary, StageOutcome, StageReport, StageStatus};

/// One coarse-grained stage of the pipeline.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Stage name, unique within a pipeline.
    fn name(&self) -> &'static str;

    /// Names of stages that must succeed before this one runs.
    fn depends_on(&self) -> &'static [&'static str] {
        &[]
    }

    /// Execute the stage. Must leave prior materializations untouched on
    /// failure; visibility of new output is all-or-nothing.
    async fn execute(&self, ctx: &RunContext) -> Result<StageOutcome>;
}

pub struct Scheduler {
    warehouse: Arc<Warehouse>,
    metrics: MetricsCollector,
}

impl Scheduler {
    #[must_use]
    pub fn new(warehouse: Arc<Warehouse>) -> Self {
        Self {
            warehouse,
            metrics: MetricsCollector::default(),
        }
    }

    /// Execute the stages of one pipeline run in dependency order.
    ///
    /// Returns the persisted run summary; stage failures are reported
    /// through the summary status, not as an error. Only run-level issues
    /// (lock conflict, ordering violation) surface as errors, after the
    /// summary has still been persisted.
    pub async fn run(
        &self,
        ctx: &RunContext,
        stages: &[Arc<dyn PipelineStage>],
    ) -> Result<RunSummary> {
        let pipeline = ctx.config().pipeline.name.clone();
        let started_at = ctx.now();

        // Acquire the run lock; a concurrent run fails fast here.
        let run_id = self.warehouse.begin_run(&pipeline, started_at)?;
        info!(run_id, pipeline = %pipeline, "Pipeline run started");

        // Validate the graph before any stage mutates a table.
        let order = match execution_order(stages) {
            Ok(order) => order,
            Err(e) => {
                error!(run_id, error = %e, "Aborting run on invalid stage graph");
                self.warehouse.finish_run(run_id, RunStatus::Failed, ctx.now())?;
                self.metrics.record_run("failed");
                return Err(e);
            }
        };

        let mut statuses: HashMap<&'static str, StageStatus> = HashMap::new();
        let mut reports = Vec::with_capacity(order.len());
        let mut cancelled = false;

        for &idx in &order {
            let stage = &stages[idx];
            let report = self.run_stage(ctx, stage.as_ref(), &statuses, &mut cancelled);
            let report = report.await;

            statuses.insert(stage.name(), report.status);
            self.warehouse.record_stage(run_id, &report)?;
            reports.push(report);
        }

        let status = if cancelled {
            RunStatus::Cancelled
        } else if reports.iter().any(|r| r.status == StageStatus::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        let finished_at = ctx.now();
        self.warehouse.finish_run(run_id, status, finished_at)?;
        self.metrics.record_run(status.as_str());
        info!(run_id, status = %status, "Pipeline run finished");

        Ok(RunSummary {
            run_id,
            pipeline,
            status,
            started_at,
            finished_at: Some(finished_at),
            stages: reports,
        })
    }

    /// Run one stage under the retry policy, honoring cancellation and
    /// dependency gating.
    async fn run_stage(
        &self,
        ctx: &RunContext,
        stage: &dyn PipelineStage,
        statuses: &HashMap<&'static str, StageStatus>,
        cancelled: &mut bool,
    ) -> StageReport {
        let started_at = ctx.now();

        // Cooperative cancellation checkpoint at the stage boundary
        if *cancelled || ctx.is_cancelled() {
            *cancelled = true;
            info!(stage = stage.name(), "Skipping stage: run cancelled");
            return StageReport {
                stage: stage.name().to_string(),
                status: StageStatus::Skipped,
                attempts: 0,
                rows_affected: 0,
                error: Some(WarehouseError::Cancelled.to_string()),
                started_at,
                finished_at: Some(ctx.now()),
            };
        }

        // Dependency gating: a failed or skipped dependency skips the
        // stage, its inputs were never committed.
        for dependency in stage.depends_on() {
            if statuses.get(dependency) != Some(&StageStatus::Succeeded) {
                warn!(
                    stage = stage.name(),
                    dependency = %dependency,
                    "Skipping stage: dependency did not succeed"
                );
                return StageReport {
                    stage: stage.name().to_string(),
                    status: StageStatus::Skipped,
                    attempts: 0,
                    rows_affected: 0,
                    error: Some(format!("dependency {dependency} did not succeed")),
                    started_at,
                    finished_at: Some(ctx.now()),
                };
            }
        }

        let pipeline_config = &ctx.config().pipeline;
        let stage_timeout = Duration::from_secs(pipeline_config.stage_timeout_secs);
        let mut last_error = None;

        for attempt in 1..=pipeline_config.max_attempts {
            info!(stage = stage.name(), attempt, "Stage attempt started");
            let attempt_start = std::time::Instant::now();

            let outcome = match tokio::time::timeout(stage_timeout, stage.execute(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(WarehouseError::StageTimeout(stage.name().to_string())),
            };

            match outcome {
                Ok(outcome) => {
                    self.metrics
                        .record_stage_attempt(stage.name(), attempt_start.elapsed(), true);
                    info!(
                        stage = stage.name(),
                        attempt,
                        rows = outcome.rows_affected,
                        "Stage succeeded"
                    );
                    return StageReport {
                        stage: stage.name().to_string(),
                        status: StageStatus::Succeeded,
                        attempts: attempt,
                        rows_affected: outcome.rows_affected,
                        error: None,
                        started_at,
                        finished_at: Some(ctx.now()),
                    };
                }
                Err(e) => {
                    self.metrics
                        .record_stage_attempt(stage.name(), attempt_start.elapsed(), false);

                    let transient = e.is_transient();
                    if transient && attempt < pipeline_config.max_attempts {
                        let delay = backoff_delay(
                            attempt,
                            pipeline_config.backoff_base_ms,
                            pipeline_config.backoff_max_ms,
                        );
                        warn!(
                            stage = stage.name(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transient stage failure, retrying with backoff"
                        );
                        self.metrics.record_stage_retry(stage.name());
                        last_error = Some(e);
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if !transient {
                        error!(stage = stage.name(), attempt, error = %e, "Fatal stage failure");
                    }

                    let failure = WarehouseError::StageFailed {
                        stage: stage.name().to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    };
                    return StageReport {
                        stage: stage.name().to_string(),
                        status: StageStatus::Failed,
                        attempts: attempt,
                        rows_affected: 0,
                        error: Some(failure.to_string()),
                        started_at,
                        finished_at: Some(ctx.now()),
                    };
                }
            }
        }

        // Unreachable with max_attempts >= 1; kept for completeness.
        StageReport {
            stage: stage.name().to_string(),
            status: StageStatus::Failed,
            attempts: pipeline_config.max_attempts,
            rows_affected: 0,
            error: last_error.map(|e| e.to_string()),
            started_at,
            finished_at: Some(ctx.now()),
        }
    }
}

/// Topologically order stages by their declared dependencies.
///
/// Returns indexes into `stages`. A dependency naming no stage in the set
/// is an ordering violation; a cycle is one too.
fn execution_order(stages: &[Arc<dyn PipelineStage>]) -> Result<Vec<usize>> {
    let by_name: HashMap<&str, usize> = stages
        .iter()
        .enumerate()
        .map(|(idx, stage)| (stage.name(), idx))
        .collect();

    for stage in stages {
        for dependency in stage.depends_on() {
            if !by_name.contains_key(dependency) {
                return Err(WarehouseError::StageOrdering {
                    stage: stage.name().to_string(),
                    dependency: (*dependency).to_string(),
                });
            }
        }
    }

    // Kahn's algorithm, preferring declared order among ready stages
    let mut remaining: HashSet<usize> = (0..stages.len()).collect();
    let mut done: HashSet<usize> = HashSet::new();
    let mut order = Vec::with_capacity(stages.len());

    while !remaining.is_empty() {
        let mut progressed = false;

        for (idx, stage) in stages.iter().enumerate() {
            if !remaining.contains(&idx) {
                continue;
            }
            let ready = stage
                .depends_on()
                .iter()
                .all(|dep| done.contains(&by_name[dep]));
            if ready {
                remaining.remove(&idx);
                done.insert(idx);
                order.push(idx);
                progressed = true;
            }
        }

        if !progressed {
            let stuck = remaining
                .iter()
                .map(|idx| stages[*idx].name())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(WarehouseError::StageOrdering {
                stage: stuck,
                dependency: "cyclic dependencies".to_string(),
            });
        }
    }

    Ok(order)
}

/// Exponential backoff with jitter, capped at the configured maximum.
fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponential = base_ms
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(max_ms);
    let jitter = rand::thread_rng().gen_range(0..=exponential / 4);
    Duration::from_millis(exponential.saturating_add(jitter).min(max_ms))
}

/// Stage: load Collector and Enricher output into the raw store.
pub struct LoadRawStage {
    warehouse: Arc<Warehouse>,
}

impl LoadRawStage {
    #[must_use]
    pub fn new(warehouse: Arc<Warehouse>) -> Self {
        Self { warehouse }
    }
}

#[async_trait]
impl PipelineStage for LoadRawStage {
    fn name(&self) -> &'static str {
        "load_raw"
    }

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutcome> {
        let warehouse = self.warehouse.clone();
        let ingest_config = ctx.config().ingest.clone();
        let max_text_length = ctx.config().warehouse.max_text_length;
        let now = ctx.now();

        tokio::task::spawn_blocking(move || {
            let partitions =
                ingest::read_message_partitions(std::path::Path::new(&ingest_config.messages_dir))?;
            let batches =
                ingest::read_detection_batches(std::path::Path::new(&ingest_config.detections_dir))?;

            let loader = Loader::new(&warehouse, max_text_length);
            let mut report = loader.load_messages(&partitions, now)?;
            report.absorb(loader.load_detections(&batches, now)?);

            Ok(StageOutcome {
                rows_affected: report.loaded,
            })
        })
        .await
        .map_err(|e| WarehouseError::Other(format!("load_raw task panicked: {e}")))?
    }
}

/// Stage: rebuild the channel dimension and generate the date dimension.
pub struct BuildDimensionsStage {
    warehouse: Arc<Warehouse>,
}

impl BuildDimensionsStage {
    #[must_use]
    pub fn new(warehouse: Arc<Warehouse>) -> Self {
        Self { warehouse }
    }
}

#[async_trait]
impl PipelineStage for BuildDimensionsStage {
    fn name(&self) -> &'static str {
        "build_dimensions"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["load_raw"]
    }

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutcome> {
        let warehouse = self.warehouse.clone();
        let warehouse_config = ctx.config().warehouse.clone();
        let now = ctx.now();

        tokio::task::spawn_blocking(move || {
            let builder = DimensionBuilder::new(&warehouse, &warehouse_config);
            let channels = builder.build_channel_dimension(now)?;
            let dates = builder.build_date_dimension()?;

            Ok(StageOutcome {
                rows_affected: channels + dates,
            })
        })
        .await
        .map_err(|e| WarehouseError::Other(format!("build_dimensions task panicked: {e}")))?
    }
}

/// Stage: rebuild the message and detection fact tables.
pub struct BuildFactsStage {
    warehouse: Arc<Warehouse>,
}

impl BuildFactsStage {
    #[must_use]
    pub fn new(warehouse: Arc<Warehouse>) -> Self {
        Self { warehouse }
    }
}

#[async_trait]
impl PipelineStage for BuildFactsStage {
    fn name(&self) -> &'static str {
        "build_facts"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["build_dimensions"]
    }

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutcome> {
        let warehouse = self.warehouse.clone();
        let warehouse_config = ctx.config().warehouse.clone();
        let now = ctx.now();

        tokio::task::spawn_blocking(move || {
            let builder = FactBuilder::new(&warehouse, &warehouse_config);
            let messages = builder.build_message_facts(now)?;
            let detections = builder.build_detection_facts(now)?;

            Ok(StageOutcome {
                rows_affected: messages + detections,
            })
        })
        .await
        .map_err(|e| WarehouseError::Other(format!("build_facts task panicked: {e}")))?
    }
}

/// The standard load -> dimensions -> facts pipeline.
#[must_use]
pub fn standard_stages(warehouse: &Arc<Warehouse>) -> Vec<Arc<dyn PipelineStage>> {
    vec![
        Arc::new(LoadRawStage::new(warehouse.clone())),
        Arc::new(BuildDimensionsStage::new(warehouse.clone())),
        Arc::new(BuildFactsStage::new(warehouse.clone())),
    ]
}

/// The transformation-only pipeline (dimensions -> facts).
#[must_use]
pub fn transform_stages(warehouse: &Arc<Warehouse>) -> Vec<Arc<dyn PipelineStage>> {
    vec![
        Arc::new(BuildDimensionsStage::new(warehouse.clone())),
        Arc::new(BuildFactsStage::new(warehouse.clone())),
    ]
}
