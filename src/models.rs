//! Data models for raw ingestion and the dimensional warehouse
//!
//! This module contains all data structures used throughout the pipeline:
//! the Collector/Enricher output contracts, validated raw-store records,
//! dimension and fact rows, and run-summary types.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Dimension key meaning "parent reference not yet resolvable".
///
/// Distinct from NULL, which means "no reference exists". Detection facts
/// carry this sentinel when their parent message fact has not been built.
pub const UNRESOLVED_KEY: i64 = -1;

/// A message record as produced by the Collector.
///
/// Fields are optional where the upstream feed can omit them; the Loader
/// rejects records that fail the natural-key contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessageRecord {
    /// Source message identifier
    pub message_id: Option<i64>,
    /// Source channel name
    pub channel_name: Option<String>,
    /// Timestamp when the message was posted
    pub message_date: Option<NaiveDateTime>,
    /// Message text content
    #[serde(default)]
    pub message_text: Option<String>,
    /// True if the message carried media
    #[serde(default)]
    pub has_media: bool,
    /// Path of the downloaded media, if any
    #[serde(default)]
    pub image_path: Option<String>,
    /// View count at scrape time
    #[serde(default)]
    pub views: Option<i64>,
    /// Forward count at scrape time
    #[serde(default)]
    pub forwards: Option<i64>,
}

/// One Collector output partition: a channel's messages for a calendar day.
#[derive(Debug, Clone)]
pub struct MessagePartition {
    /// Source channel name
    pub channel_name: String,
    /// Partition calendar day
    pub partition_date: NaiveDate,
    /// Path of the partition file, relative to the ingest root
    pub source_file: String,
    /// Records parsed from the partition
    pub records: Vec<RawMessageRecord>,
}

/// A detection record as produced by the Enricher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Source message identifier
    pub message_id: Option<i64>,
    /// Analyzed image path
    pub image_path: String,
    /// Number of detected objects
    pub detection_count: i64,
    /// Comma-separated detected class labels
    pub detected_classes: String,
    /// Assigned image category
    pub image_category: String,
    /// Average detection confidence in [0,1]
    pub confidence_score: f64,
    /// True if a person was detected
    pub has_person: bool,
    /// True if a product was detected
    pub has_product: bool,
    /// Enrichment processing timestamp
    pub processed_at: Option<NaiveDateTime>,
}

/// One Enricher output file's worth of detection records.
#[derive(Debug, Clone)]
pub struct DetectionBatch {
    /// Path of the source file, relative to the ingest root
    pub source_file: String,
    /// Records parsed from the file
    pub records: Vec<DetectionRecord>,
}

/// A validated message ready for insertion into the raw store.
#[derive(Debug, Clone)]
pub struct NewRawMessage {
    /// Source message identifier
    pub message_id: i64,
    /// Source channel name
    pub channel_name: String,
    /// Timestamp when the message was posted
    pub message_date: NaiveDateTime,
    /// Message text content (truncated at load)
    pub message_text: String,
    /// True if the message carried media
    pub has_media: bool,
    /// Path of the downloaded media, if any
    pub image_path: Option<String>,
    /// View count at scrape time
    pub views: i64,
    /// Forward count at scrape time
    pub forwards: i64,
    /// Source partition file
    pub source_file: String,
}

/// A validated detection ready for insertion into the raw store.
#[derive(Debug, Clone)]
pub struct NewRawDetection {
    /// Source message identifier
    pub message_id: i64,
    /// Analyzed image path
    pub image_path: String,
    /// Number of detected objects
    pub detection_count: i64,
    /// Comma-separated detected class labels
    pub detected_classes: String,
    /// Assigned image category
    pub image_category: String,
    /// Average detection confidence in [0,1]
    pub confidence_score: f64,
    /// True if a person was detected
    pub has_person: bool,
    /// True if a product was detected
    pub has_product: bool,
    /// Enrichment processing timestamp
    pub processed_at: NaiveDateTime,
}

/// Channel dimension row.
///
/// Fully recomputed from the raw store on each run; the surrogate key is a
/// stable hash of the channel name so fact joins survive rebuilds.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDimRow {
    /// Surrogate key (stable hash of channel name)
    pub channel_key: i64,
    /// Channel natural name
    pub channel_name: String,
    /// Derived channel type
    pub channel_type: String,
    /// First post date
    pub first_post_date: NaiveDate,
    /// Last post date
    pub last_post_date: NaiveDate,
    /// Total post count
    pub total_posts: i64,
    /// Total view count
    pub total_views: i64,
    /// Average views per post
    pub avg_views: f64,
    /// Total forward count
    pub total_forwards: i64,
    /// Average forwards per post
    pub avg_forwards: f64,
    /// Average message length in characters
    pub avg_message_length: f64,
    /// Posts with an image
    pub image_post_count: i64,
    /// Derived activity tier
    pub activity_level: String,
    /// Materialization timestamp
    pub loaded_at: NaiveDateTime,
}

/// Date dimension row.
#[derive(Debug, Clone, PartialEq)]
pub struct DateDimRow {
    /// Surrogate key, the date encoded as YYYYMMDD
    pub date_key: i64,
    /// Full calendar date
    pub full_date: NaiveDate,
    /// Year
    pub year: i32,
    /// Quarter (1-4)
    pub quarter: i64,
    /// Month number (1-12)
    pub month: i64,
    /// Month name
    pub month_name: String,
    /// ISO week of year
    pub week_of_year: i64,
    /// Day of week (1 = Monday, 7 = Sunday)
    pub day_of_week: i64,
    /// Day name
    pub day_name: String,
    /// True for Saturday and Sunday
    pub is_weekend: bool,
    /// Holiday label, if the date is a fixed-date holiday
    pub holiday: Option<String>,
}

/// Message fact row.
///
/// Dimension keys are NULL when the lookup misses; the message itself is
/// never dropped for a missing dimension row.
#[derive(Debug, Clone)]
pub struct MessageFactRow {
    /// Primary key, the source message identifier
    pub message_id: i64,
    /// Channel dimension key, NULL when unresolved
    pub channel_key: Option<i64>,
    /// Date dimension key, NULL when unresolved
    pub date_key: Option<i64>,
    /// Message text
    pub message_text: String,
    /// Message length in characters
    pub message_length: i64,
    /// View count
    pub view_count: i64,
    /// Forward count
    pub forward_count: i64,
    /// True if the message carried an image
    pub has_image: bool,
    /// Forwards as a percentage of views, 0 when views = 0
    pub forward_rate: f64,
    /// Hour of day (0-23)
    pub hour_of_day: i64,
    /// Four-bucket time-of-day label
    pub time_of_day: String,
    /// Materialization timestamp
    pub loaded_at: NaiveDateTime,
}

/// Image detection fact row.
///
/// Channel/date keys are inherited through the parent message fact and fall
/// back to [`UNRESOLVED_KEY`] when the parent is absent.
#[derive(Debug, Clone)]
pub struct DetectionFactRow {
    /// Surrogate primary key derived from (message_id, processed_at)
    pub detection_key: i64,
    /// Source message identifier
    pub message_id: i64,
    /// Channel dimension key, -1 when the parent fact is absent
    pub channel_key: i64,
    /// Date dimension key, -1 when the parent fact is absent
    pub date_key: i64,
    /// Analyzed image path
    pub image_path: String,
    /// Detected object count
    pub detection_count: i64,
    /// Detected class labels
    pub detected_classes: String,
    /// Image category
    pub image_category: String,
    /// Confidence score
    pub confidence_score: f64,
    /// True if a person was detected
    pub has_person: bool,
    /// True if a product was detected
    pub has_product: bool,
    /// Derived content strategy
    pub content_strategy: String,
    /// Derived confidence tier
    pub confidence_level: String,
    /// Enrichment processing timestamp
    pub processed_at: NaiveDateTime,
    /// Materialization timestamp
    pub loaded_at: NaiveDateTime,
}

/// Lifecycle of a stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    /// Not yet started
    Pending,
    /// Currently executing
    Running,
    /// Completed successfully
    Succeeded,
    /// Exhausted retries or hit a fatal error
    Failed,
    /// Not executed because a dependency failed or the run was cancelled
    Skipped,
}

impl StageStatus {
    /// Database representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parse a database status value.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "running" => Self::Running,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is active and holds the pipeline lock
    Running,
    /// All stages succeeded
    Succeeded,
    /// At least one stage failed
    Failed,
    /// Cancelled at a stage boundary
    Cancelled,
}

impl RunStatus {
    /// Database representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a database status value.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Running,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage record within a run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage name
    pub stage: String,
    /// Final stage status
    pub status: StageStatus,
    /// Number of attempts made
    pub attempts: u32,
    /// Rows affected by the stage
    pub rows_affected: u64,
    /// Captured error message, if the stage failed
    pub error: Option<String>,
    /// Stage start timestamp
    pub started_at: NaiveDateTime,
    /// Stage end timestamp
    pub finished_at: Option<NaiveDateTime>,
}

/// Durable summary of one pipeline execution.
///
/// Persisted on every exit path, including partial failure, so operators
/// can diagnose which stage broke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier
    pub run_id: i64,
    /// Pipeline identity (run-lock key)
    pub pipeline: String,
    /// Overall run status
    pub status: RunStatus,
    /// Run start timestamp
    pub started_at: NaiveDateTime,
    /// Run end timestamp
    pub finished_at: Option<NaiveDateTime>,
    /// Per-stage reports in execution order
    pub stages: Vec<StageReport>,
}

/// Result of the execution of a single stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageOutcome {
    /// Rows inserted, updated or rebuilt by the stage
    pub rows_affected: u64,
}

/// Counters produced by a raw-store load.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadReport {
    /// Records upserted
    pub loaded: u64,
    /// Records dropped for contract violations
    pub rejected: u64,
    /// Partitions processed for the first time
    pub new_partitions: u64,
    /// Partitions already covered by a watermark
    pub reprocessed_partitions: u64,
}

impl LoadReport {
    /// Fold another report into this one.
    pub fn absorb(&mut self, other: LoadReport) {
        self.loaded += other.loaded;
        self.rejected += other.rejected;
        self.new_partitions += other.new_partitions;
        self.reprocessed_partitions += other.reprocessed_partitions;
    }
}
