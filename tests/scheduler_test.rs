use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use medtel_warehouse::config::AppConfig;
use medtel_warehouse::context::{FixedClock, RunContext};
use medtel_warehouse::db::Warehouse;
use medtel_warehouse::error::{Result, WarehouseError};
use medtel_warehouse::models::{RunStatus, StageOutcome, StageStatus};
use medtel_warehouse::scheduler::{standard_stages, PipelineStage, Scheduler};

fn test_warehouse(dir: &tempfile::TempDir) -> Arc<Warehouse> {
    let db_path = dir.path().join("test.db");
    Arc::new(
        Warehouse::new(&db_path.display().to_string(), 4, Duration::from_secs(5))
            .expect("Failed to create warehouse"),
    )
}

fn fixed_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 7, 2)
        .and_then(|d| d.and_hms_opt(2, 0, 0))
        .expect("valid timestamp")
}

fn test_config(dir: &tempfile::TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.backoff_base_ms = 1;
    config.pipeline.backoff_max_ms = 10;
    config.warehouse.date_horizon_start_year = 2025;
    config.warehouse.date_horizon_end_year = 2025;
    config.ingest.messages_dir = dir
        .path()
        .join("telegram_messages")
        .display()
        .to_string();
    config.ingest.detections_dir = dir.path().join("detections").display().to_string();
    config
}

fn test_context(dir: &tempfile::TempDir) -> RunContext {
    RunContext::with_clock(test_config(dir), Arc::new(FixedClock(fixed_now())))
}

fn seed_collector_output(dir: &tempfile::TempDir) {
    let day_dir = dir.path().join("telegram_messages").join("2025-07-01");
    std::fs::create_dir_all(&day_dir).expect("create day dir");
    let mut file =
        std::fs::File::create(day_dir.join("tikvah_pharma.json")).expect("create partition");
    write!(
        file,
        r#"{{"messages": [
            {{"message_id": 1, "channel_name": "tikvah_pharma",
              "message_date": "2025-07-01T09:30:00", "message_text": "New stock",
              "has_media": true, "image_path": "images/tikvah_pharma/1.jpg",
              "views": 1200, "forwards": 15}},
            {{"message_id": 2, "channel_name": "tikvah_pharma",
              "message_date": "2025-07-01T21:00:00", "message_text": "Evening post",
              "views": 0, "forwards": 5}}
        ]}}"#
    )
    .expect("write partition");

    let det_dir = dir.path().join("detections");
    std::fs::create_dir_all(&det_dir).expect("create detections dir");
    let mut csv = std::fs::File::create(det_dir.join("latest_detections.csv")).expect("csv");
    writeln!(
        csv,
        "message_id,image_path,detection_count,detected_classes,image_category,confidence_score,has_person,has_product,processed_at"
    )
    .expect("header");
    writeln!(
        csv,
        "1,images/tikvah_pharma/1.jpg,2,\"bottle, person\",promotional,0.87,true,true,2025-07-01T10:00:00"
    )
    .expect("row");
    writeln!(
        csv,
        "777,images/tikvah_pharma/777.jpg,1,bottle,product_display,0.45,false,true,2025-07-01T10:05:00"
    )
    .expect("row");
}

#[tokio::test]
async fn test_full_pipeline_runs_in_dependency_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let warehouse = test_warehouse(&dir);
    seed_collector_output(&dir);

    let ctx = test_context(&dir);
    let scheduler = Scheduler::new(warehouse.clone());
    let summary = scheduler
        .run(&ctx, &standard_stages(&warehouse))
        .await
        .expect("run should complete");

    assert_eq!(summary.status, RunStatus::Succeeded);
    let names: Vec<&str> = summary.stages.iter().map(|s| s.stage.as_str()).collect();
    assert_eq!(names, vec!["load_raw", "build_dimensions", "build_facts"]);
    assert!(summary
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Succeeded));

    let conn = warehouse.get_connection().expect("connection");
    let message_facts: i64 = conn
        .query_row("SELECT COUNT(*) FROM fct_messages", [], |row| row.get(0))
        .expect("count");
    assert_eq!(message_facts, 2);

    // The matched detection inherits keys; the unmatched one keeps -1
    let unmatched_keys: (i64, i64) = conn
        .query_row(
            "SELECT channel_key, date_key FROM fct_image_detections WHERE message_id = 777",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("sentinel row");
    assert_eq!(unmatched_keys, (-1, -1));

    let matched_channel: i64 = conn
        .query_row(
            "SELECT channel_key FROM fct_image_detections WHERE message_id = 1",
            [],
            |row| row.get(0),
        )
        .expect("matched row");
    assert!(matched_channel > 0);

    // Summary is durable, not only returned
    let persisted = warehouse
        .get_run_summary(summary.run_id)
        .expect("summary query")
        .expect("summary exists");
    assert_eq!(persisted.status, RunStatus::Succeeded);
    assert_eq!(persisted.stages.len(), 3);
}

#[tokio::test]
async fn test_facts_without_dimensions_is_ordering_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let warehouse = test_warehouse(&dir);

    let ctx = test_context(&dir);
    let scheduler = Scheduler::new(warehouse.clone());

    // Only the facts stage: its dependency is not part of the run
    let stages = vec![standard_stages(&warehouse)
        .into_iter()
        .last()
        .expect("facts stage")];

    let err = scheduler
        .run(&ctx, &stages)
        .await
        .expect_err("ordering violation expected");
    assert!(matches!(err, WarehouseError::StageOrdering { .. }));

    // No fact mutation occurred
    let conn = warehouse.get_connection().expect("connection");
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM fct_messages", [], |row| row.get(0))
        .expect("count");
    assert_eq!(count, 0);

    // The aborted run is still recorded for the operator
    let runs = warehouse.recent_runs(1).expect("recent runs");
    assert_eq!(runs[0].status, RunStatus::Failed);
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let warehouse = test_warehouse(&dir);
    seed_collector_output(&dir);

    // First run holds the lock
    let active_run = warehouse
        .begin_run("medtel", fixed_now())
        .expect("first run acquires lock");

    let ctx = test_context(&dir);
    let scheduler = Scheduler::new(warehouse.clone());
    let err = scheduler
        .run(&ctx, &standard_stages(&warehouse))
        .await
        .expect_err("second run must be rejected");
    assert!(matches!(err, WarehouseError::RunInProgress(_)));

    // The first run is unaffected and can complete normally
    warehouse
        .finish_run(active_run, RunStatus::Succeeded, fixed_now())
        .expect("finish first run");

    let summary = scheduler
        .run(&ctx, &standard_stages(&warehouse))
        .await
        .expect("lock released, run proceeds");
    assert_eq!(summary.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_cancelled_run_skips_stages_and_persists_summary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let warehouse = test_warehouse(&dir);
    seed_collector_output(&dir);

    let ctx = test_context(&dir);
    ctx.cancellation_token().cancel();

    let scheduler = Scheduler::new(warehouse.clone());
    let summary = scheduler
        .run(&ctx, &standard_stages(&warehouse))
        .await
        .expect("cancelled run still completes");

    assert_eq!(summary.status, RunStatus::Cancelled);
    assert!(summary
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Skipped));

    let persisted = warehouse
        .get_run_summary(summary.run_id)
        .expect("summary query")
        .expect("summary exists");
    assert_eq!(persisted.status, RunStatus::Cancelled);
}

struct FlakyStage {
    attempts: AtomicU32,
    failures_before_success: u32,
}

#[async_trait]
impl PipelineStage for FlakyStage {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn execute(&self, _ctx: &RunContext) -> Result<StageOutcome> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures_before_success {
            Err(WarehouseError::StageTimeout("flaky".to_string()))
        } else {
            Ok(StageOutcome { rows_affected: 1 })
        }
    }
}

struct FatalStage {
    attempts: AtomicU32,
}

#[async_trait]
impl PipelineStage for FatalStage {
    fn name(&self) -> &'static str {
        "fatal"
    }

    async fn execute(&self, _ctx: &RunContext) -> Result<StageOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(WarehouseError::ContractViolation("schema drift".to_string()))
    }
}

#[tokio::test]
async fn test_transient_failures_are_retried_with_backoff() {
    let dir = tempfile::tempdir().expect("tempdir");
    let warehouse = test_warehouse(&dir);

    let ctx = test_context(&dir);
    let scheduler = Scheduler::new(warehouse.clone());
    let stages: Vec<Arc<dyn PipelineStage>> = vec![Arc::new(FlakyStage {
        attempts: AtomicU32::new(0),
        failures_before_success: 2,
    })];

    let summary = scheduler.run(&ctx, &stages).await.expect("run completes");
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.stages[0].attempts, 3);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_fails_stage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let warehouse = test_warehouse(&dir);

    let ctx = test_context(&dir);
    let scheduler = Scheduler::new(warehouse.clone());
    let stages: Vec<Arc<dyn PipelineStage>> = vec![Arc::new(FlakyStage {
        attempts: AtomicU32::new(0),
        failures_before_success: 10,
    })];

    let summary = scheduler.run(&ctx, &stages).await.expect("run completes");
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.stages[0].attempts, 3); // configured max
    assert!(summary.stages[0].error.is_some());
}

#[tokio::test]
async fn test_non_transient_failure_is_not_retried() {
    let dir = tempfile::tempdir().expect("tempdir");
    let warehouse = test_warehouse(&dir);

    let ctx = test_context(&dir);
    let scheduler = Scheduler::new(warehouse.clone());
    let fatal = Arc::new(FatalStage {
        attempts: AtomicU32::new(0),
    });
    let stages: Vec<Arc<dyn PipelineStage>> = vec![fatal.clone()];

    let summary = scheduler.run(&ctx, &stages).await.expect("run completes");
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(fatal.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(summary.stages[0].attempts, 1);
}

struct FailThenObserveStage;

#[async_trait]
impl PipelineStage for FailThenObserveStage {
    fn name(&self) -> &'static str {
        "broken_load"
    }

    async fn execute(&self, _ctx: &RunContext) -> Result<StageOutcome> {
        Err(WarehouseError::ContractViolation("bad feed".to_string()))
    }
}

struct DependentStage;

#[async_trait]
impl PipelineStage for DependentStage {
    fn name(&self) -> &'static str {
        "dependent"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["broken_load"]
    }

    async fn execute(&self, _ctx: &RunContext) -> Result<StageOutcome> {
        Ok(StageOutcome { rows_affected: 1 })
    }
}

#[tokio::test]
async fn test_dependents_of_failed_stage_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let warehouse = test_warehouse(&dir);

    let ctx = test_context(&dir);
    let scheduler = Scheduler::new(warehouse.clone());
    let stages: Vec<Arc<dyn PipelineStage>> =
        vec![Arc::new(FailThenObserveStage), Arc::new(DependentStage)];

    let summary = scheduler.run(&ctx, &stages).await.expect("run completes");
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.stages[0].status, StageStatus::Failed);
    assert_eq!(summary.stages[1].status, StageStatus::Skipped);
}
