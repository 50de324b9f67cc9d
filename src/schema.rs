//! Database schema definitions
//!
//! This module provides constants for table and column names used with rusqlite.
//! Raw tables hold ingested Collector/Enricher output; marts tables hold the
//! derived star schema; ops tables hold watermarks and run summaries.

/// Raw messages table schema
pub mod raw_messages {
    /// Table name
    pub const TABLE: &str = "raw_messages";
    /// Primary key column
    pub const ID: &str = "id";
    /// Source message identifier column
    pub const MESSAGE_ID: &str = "message_id";
    /// Source channel name column
    pub const CHANNEL_NAME: &str = "channel_name";
    /// Message timestamp column
    pub const MESSAGE_DATE: &str = "message_date";
    /// Message text content column
    pub const MESSAGE_TEXT: &str = "message_text";
    /// Flag indicating attached media
    pub const HAS_MEDIA: &str = "has_media";
    /// Downloaded media path column
    pub const IMAGE_PATH: &str = "image_path";
    /// View count column
    pub const VIEWS: &str = "views";
    /// Forward count column
    pub const FORWARDS: &str = "forwards";
    /// Ingestion timestamp column
    pub const LOADED_AT: &str = "loaded_at";
    /// Source partition file column
    pub const SOURCE_FILE: &str = "source_file";
}

/// Raw image detections table schema
pub mod raw_detections {
    /// Table name
    pub const TABLE: &str = "raw_detections";
    /// Primary key column
    pub const ID: &str = "id";
    /// Source message identifier column
    pub const MESSAGE_ID: &str = "message_id";
    /// Analyzed image path column
    pub const IMAGE_PATH: &str = "image_path";
    /// Detected object count column
    pub const DETECTION_COUNT: &str = "detection_count";
    /// Comma-separated detected class labels column
    pub const DETECTED_CLASSES: &str = "detected_classes";
    /// Assigned image category column
    pub const IMAGE_CATEGORY: &str = "image_category";
    /// Average detection confidence column
    pub const CONFIDENCE_SCORE: &str = "confidence_score";
    /// Flag for a detected person
    pub const HAS_PERSON: &str = "has_person";
    /// Flag for a detected product
    pub const HAS_PRODUCT: &str = "has_product";
    /// Enrichment processing timestamp column
    pub const PROCESSED_AT: &str = "processed_at";
    /// Ingestion timestamp column
    pub const LOADED_AT: &str = "loaded_at";
}

/// Partition load watermarks table schema
pub mod load_watermarks {
    /// Table name
    pub const TABLE: &str = "load_watermarks";
    /// Primary key column
    pub const ID: &str = "id";
    /// Source channel name column
    pub const CHANNEL_NAME: &str = "channel_name";
    /// Partition calendar day column
    pub const PARTITION_DATE: &str = "partition_date";
    /// Messages loaded from the partition column
    pub const MESSAGE_COUNT: &str = "message_count";
    /// Last load timestamp column
    pub const LOADED_AT: &str = "loaded_at";
}

/// Channel dimension table schema
pub mod dim_channels {
    /// Table name
    pub const TABLE: &str = "dim_channels";
    /// Surrogate key column
    pub const CHANNEL_KEY: &str = "channel_key";
    /// Channel natural name column
    pub const CHANNEL_NAME: &str = "channel_name";
    /// Derived channel type column
    pub const CHANNEL_TYPE: &str = "channel_type";
    /// First post date column
    pub const FIRST_POST_DATE: &str = "first_post_date";
    /// Last post date column
    pub const LAST_POST_DATE: &str = "last_post_date";
    /// Total post count column
    pub const TOTAL_POSTS: &str = "total_posts";
    /// Total view count column
    pub const TOTAL_VIEWS: &str = "total_views";
    /// Average views per post column
    pub const AVG_VIEWS: &str = "avg_views";
    /// Total forward count column
    pub const TOTAL_FORWARDS: &str = "total_forwards";
    /// Average forwards per post column
    pub const AVG_FORWARDS: &str = "avg_forwards";
    /// Average message length column
    pub const AVG_MESSAGE_LENGTH: &str = "avg_message_length";
    /// Posts with images column
    pub const IMAGE_POST_COUNT: &str = "image_post_count";
    /// Derived activity tier column
    pub const ACTIVITY_LEVEL: &str = "activity_level";
    /// Materialization timestamp column
    pub const LOADED_AT: &str = "loaded_at";
}

/// Date dimension table schema
pub mod dim_dates {
    /// Table name
    pub const TABLE: &str = "dim_dates";
    /// Surrogate key column (YYYYMMDD)
    pub const DATE_KEY: &str = "date_key";
    /// Full calendar date column
    pub const FULL_DATE: &str = "full_date";
    /// Year column
    pub const YEAR: &str = "year";
    /// Quarter column
    pub const QUARTER: &str = "quarter";
    /// Month number column
    pub const MONTH: &str = "month";
    /// Month name column
    pub const MONTH_NAME: &str = "month_name";
    /// ISO week of year column
    pub const WEEK_OF_YEAR: &str = "week_of_year";
    /// Day of week column (1 = Monday)
    pub const DAY_OF_WEEK: &str = "day_of_week";
    /// Day name column
    pub const DAY_NAME: &str = "day_name";
    /// Weekend flag column
    pub const IS_WEEKEND: &str = "is_weekend";
    /// Holiday label column
    pub const HOLIDAY: &str = "holiday";
}

/// Message fact table schema
pub mod fct_messages {
    /// Table name
    pub const TABLE: &str = "fct_messages";
    /// Primary key column (source message identifier)
    pub const MESSAGE_ID: &str = "message_id";
    /// Channel dimension foreign key column
    pub const CHANNEL_KEY: &str = "channel_key";
    /// Date dimension foreign key column
    pub const DATE_KEY: &str = "date_key";
    /// Message text column
    pub const MESSAGE_TEXT: &str = "message_text";
    /// Message length column
    pub const MESSAGE_LENGTH: &str = "message_length";
    /// View count column
    pub const VIEW_COUNT: &str = "view_count";
    /// Forward count column
    pub const FORWARD_COUNT: &str = "forward_count";
    /// Image flag column
    pub const HAS_IMAGE: &str = "has_image";
    /// Forward rate column (forwards/views as a percentage)
    pub const FORWARD_RATE: &str = "forward_rate";
    /// Hour of day column
    pub const HOUR_OF_DAY: &str = "hour_of_day";
    /// Time of day bucket column
    pub const TIME_OF_DAY: &str = "time_of_day";
    /// Materialization timestamp column
    pub const LOADED_AT: &str = "loaded_at";
}

/// Image detection fact table schema
pub mod fct_image_detections {
    /// Table name
    pub const TABLE: &str = "fct_image_detections";
    /// Surrogate primary key column
    pub const DETECTION_KEY: &str = "detection_key";
    /// Source message identifier column
    pub const MESSAGE_ID: &str = "message_id";
    /// Channel dimension foreign key column (-1 when parent fact is absent)
    pub const CHANNEL_KEY: &str = "channel_key";
    /// Date dimension foreign key column (-1 when parent fact is absent)
    pub const DATE_KEY: &str = "date_key";
    /// Analyzed image path column
    pub const IMAGE_PATH: &str = "image_path";
    /// Detected object count column
    pub const DETECTION_COUNT: &str = "detection_count";
    /// Detected class labels column
    pub const DETECTED_CLASSES: &str = "detected_classes";
    /// Image category column
    pub const IMAGE_CATEGORY: &str = "image_category";
    /// Confidence score column
    pub const CONFIDENCE_SCORE: &str = "confidence_score";
    /// Person flag column
    pub const HAS_PERSON: &str = "has_person";
    /// Product flag column
    pub const HAS_PRODUCT: &str = "has_product";
    /// Derived content strategy column
    pub const CONTENT_STRATEGY: &str = "content_strategy";
    /// Derived confidence tier column
    pub const CONFIDENCE_LEVEL: &str = "confidence_level";
    /// Enrichment processing timestamp column
    pub const PROCESSED_AT: &str = "processed_at";
    /// Materialization timestamp column
    pub const LOADED_AT: &str = "loaded_at";
}

/// Pipeline runs table schema
pub mod pipeline_runs {
    /// Table name
    pub const TABLE: &str = "pipeline_runs";
    /// Primary key column
    pub const ID: &str = "id";
    /// Pipeline identity column (run-lock key)
    pub const PIPELINE: &str = "pipeline";
    /// Run status column
    pub const STATUS: &str = "status";
    /// Run start timestamp column
    pub const STARTED_AT: &str = "started_at";
    /// Run end timestamp column
    pub const FINISHED_AT: &str = "finished_at";
}

/// Pipeline run stages table schema
pub mod pipeline_run_stages {
    /// Table name
    pub const TABLE: &str = "pipeline_run_stages";
    /// Primary key column
    pub const ID: &str = "id";
    /// Foreign key to pipeline_runs column
    pub const RUN_ID: &str = "run_id";
    /// Stage name column
    pub const STAGE: &str = "stage";
    /// Stage status column
    pub const STATUS: &str = "status";
    /// Attempt count column
    pub const ATTEMPTS: &str = "attempts";
    /// Rows affected column
    pub const ROWS_AFFECTED: &str = "rows_affected";
    /// Captured error column
    pub const ERROR: &str = "error";
    /// Stage start timestamp column
    pub const STARTED_AT: &str = "started_at";
    /// Stage end timestamp column
    pub const FINISHED_AT: &str = "finished_at";
}
