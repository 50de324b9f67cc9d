use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDateTime;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, WarehouseError};
use crate::models::{RunStatus, RunSummary, StageReport, StageStatus};
use crate::schema::{pipeline_run_stages, pipeline_runs};

// Type aliases for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Warehouse store: connection pool plus run bookkeeping.
///
/// Connections are scoped resources: stages acquire one from the pool,
/// and the pool reclaims it on every exit path including failure.
pub struct Warehouse {
    pool: DbPool,
}

impl Warehouse {
    /// Create a new warehouse connection pool and run migrations.
    pub fn new(database_url: &str, max_connections: u32, busy_timeout: Duration) -> Result<Self> {
        let path = database_path(database_url);

        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Set up connection manager and pool; every connection gets the
        // bounded busy timeout so no store call blocks indefinitely.
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        });
        let pool = Pool::builder().max_size(max_connections).build(manager)?;

        // Run migrations
        let conn = pool.get()?;
        Self::run_migrations(&conn)?;

        Ok(Self { pool })
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(include_str!(
            "../migrations/2026-07-10-000000_create_raw_tables/up.sql"
        ))?;
        conn.execute_batch(include_str!(
            "../migrations/2026-07-10-000001_create_marts_tables/up.sql"
        ))?;
        conn.execute_batch(include_str!(
            "../migrations/2026-07-10-000002_create_ops_tables/up.sql"
        ))?;

        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Open a new run row, acquiring the pipeline run lock.
    ///
    /// At most one 'running' row may exist per pipeline (partial unique
    /// index); a conflicting insert fails fast rather than blocking.
    pub fn begin_run(&self, pipeline: &str, started_at: NaiveDateTime) -> Result<i64> {
        let conn = self.get_connection()?;

        let inserted = conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}) VALUES (?, ?, ?)",
                pipeline_runs::TABLE,
                pipeline_runs::PIPELINE,
                pipeline_runs::STATUS,
                pipeline_runs::STARTED_AT
            ),
            params![pipeline, RunStatus::Running.as_str(), started_at],
        );

        match inserted {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e)
                if e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) =>
            {
                Err(WarehouseError::RunInProgress(pipeline.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Close a run row, releasing the pipeline run lock.
    pub fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        finished_at: NaiveDateTime,
    ) -> Result<()> {
        let conn = self.get_connection()?;

        conn.execute(
            &format!(
                "UPDATE {} SET {} = ?, {} = ? WHERE {} = ?",
                pipeline_runs::TABLE,
                pipeline_runs::STATUS,
                pipeline_runs::FINISHED_AT,
                pipeline_runs::ID
            ),
            params![status.as_str(), finished_at, run_id],
        )?;

        Ok(())
    }

    /// Persist one stage report under a run.
    pub fn record_stage(&self, run_id: i64, report: &StageReport) -> Result<()> {
        let conn = self.get_connection()?;

        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                pipeline_run_stages::TABLE,
                pipeline_run_stages::RUN_ID,
                pipeline_run_stages::STAGE,
                pipeline_run_stages::STATUS,
                pipeline_run_stages::ATTEMPTS,
                pipeline_run_stages::ROWS_AFFECTED,
                pipeline_run_stages::ERROR,
                pipeline_run_stages::STARTED_AT,
                pipeline_run_stages::FINISHED_AT
            ),
            params![
                run_id,
                report.stage,
                report.status.as_str(),
                report.attempts,
                report.rows_affected as i64,
                report.error,
                report.started_at,
                report.finished_at
            ],
        )?;

        Ok(())
    }

    /// Load a run summary with its stage reports.
    pub fn get_run_summary(&self, run_id: i64) -> Result<Option<RunSummary>> {
        let conn = self.get_connection()?;

        let run = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ?",
                    pipeline_runs::TABLE,
                    pipeline_runs::ID
                ),
                params![run_id],
                |row| Self::map_run(row),
            )
            .optional()?;

        let Some(mut summary) = run else {
            return Ok(None);
        };

        summary.stages = self.get_stage_reports(&conn, run_id)?;
        Ok(Some(summary))
    }

    /// Load the most recent run summaries, newest first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY {} DESC LIMIT ?",
            pipeline_runs::TABLE,
            pipeline_runs::ID
        ))?;

        let run_iter = stmt.query_map(params![limit as i64], |row| Self::map_run(row))?;

        let mut summaries = Vec::new();
        for run in run_iter {
            let mut summary = run?;
            summary.stages = self.get_stage_reports(&conn, summary.run_id)?;
            summaries.push(summary);
        }

        Ok(summaries)
    }

    fn get_stage_reports(&self, conn: &Connection, run_id: i64) -> Result<Vec<StageReport>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {} ASC",
            pipeline_run_stages::TABLE,
            pipeline_run_stages::RUN_ID,
            pipeline_run_stages::ID
        ))?;

        let report_iter = stmt.query_map(params![run_id], |row| Self::map_stage_report(row))?;

        let mut reports = Vec::new();
        for report in report_iter {
            reports.push(report?);
        }

        Ok(reports)
    }

    /// Map a database row to a RunSummary (stages filled in by the caller)
    fn map_run(row: &Row) -> rusqlite::Result<RunSummary> {
        let status: String = row.get(pipeline_runs::STATUS)?;
        Ok(RunSummary {
            run_id: row.get(pipeline_runs::ID)?,
            pipeline: row.get(pipeline_runs::PIPELINE)?,
            status: RunStatus::parse(&status),
            started_at: row.get(pipeline_runs::STARTED_AT)?,
            finished_at: row.get(pipeline_runs::FINISHED_AT)?,
            stages: Vec::new(),
        })
    }

    /// Map a database row to a StageReport
    fn map_stage_report(row: &Row) -> rusqlite::Result<StageReport> {
        let status: String = row.get(pipeline_run_stages::STATUS)?;
        let rows_affected: i64 = row.get(pipeline_run_stages::ROWS_AFFECTED)?;
        Ok(StageReport {
            stage: row.get(pipeline_run_stages::STAGE)?,
            status: StageStatus::parse(&status),
            attempts: row.get(pipeline_run_stages::ATTEMPTS)?,
            rows_affected: rows_affected.max(0) as u64,
            error: row.get(pipeline_run_stages::ERROR)?,
            started_at: row.get(pipeline_run_stages::STARTED_AT)?,
            finished_at: row.get(pipeline_run_stages::FINISHED_AT)?,
        })
    }
}

/// Strip an optional `sqlite:`-style scheme from a database URL.
fn database_path(url: &str) -> &str {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url)
}
