//! Raw-store loader.
//!
//! Moves Collector and Enricher output into the raw store idempotently:
//! every record is upserted by its natural key, so loading the same batch
//! twice leaves the store exactly as loading it once. Records failing the
//! load contract are dropped and logged individually; they never abort the
//! batch. A watermark row per (channel, partition day) records what has
//! been loaded so reprocessed partitions are distinguishable from new ones.

use chrono::NaiveDateTime;
use rusqlite::params;
use tracing::{info, warn};

use crate::db::Warehouse;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::models::{DetectionBatch, LoadReport, MessagePartition};
use crate::schema::{load_watermarks, raw_detections, raw_messages};
use crate::validation::InputValidator;

pub struct Loader<'a> {
    warehouse: &'a Warehouse,
    metrics: MetricsCollector,
    max_text_length: usize,
}

impl<'a> Loader<'a> {
    #[must_use]
    pub fn new(warehouse: &'a Warehouse, max_text_length: usize) -> Self {
        Self {
            warehouse,
            metrics: MetricsCollector::default(),
            max_text_length,
        }
    }

    /// Load message partitions into the raw store.
    ///
    /// Each partition is committed in its own transaction; a
    /// store-connectivity failure aborts the remaining batch and surfaces
    /// as a retryable stage failure.
    pub fn load_messages(
        &self,
        partitions: &[MessagePartition],
        now: NaiveDateTime,
    ) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        for partition in partitions {
            report.absorb(self.load_message_partition(partition, now)?);
        }

        info!(
            loaded = report.loaded,
            rejected = report.rejected,
            new_partitions = report.new_partitions,
            reprocessed = report.reprocessed_partitions,
            "Message load completed"
        );

        Ok(report)
    }

    fn load_message_partition(
        &self,
        partition: &MessagePartition,
        now: NaiveDateTime,
    ) -> Result<LoadReport> {
        let mut conn = self.warehouse.get_connection()?;
        let mut report = LoadReport::default();

        // A watermark row means this partition was loaded before; the
        // upsert below keeps the re-run idempotent either way.
        let already_loaded: bool = conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ? AND {} = ?)",
                load_watermarks::TABLE,
                load_watermarks::CHANNEL_NAME,
                load_watermarks::PARTITION_DATE
            ),
            params![partition.channel_name, partition.partition_date],
            |row| row.get(0),
        )?;

        if already_loaded {
            report.reprocessed_partitions = 1;
            info!(
                channel = %partition.channel_name,
                date = %partition.partition_date,
                "Reprocessing partition already covered by watermark"
            );
        } else {
            report.new_partitions = 1;
        }

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT ({}, {}) DO UPDATE SET \
                 {} = excluded.{}, {} = excluded.{}, {} = excluded.{}, \
                 {} = excluded.{}, {} = excluded.{}, {} = excluded.{}, \
                 {} = excluded.{}, {} = excluded.{}",
                raw_messages::TABLE,
                raw_messages::MESSAGE_ID,
                raw_messages::CHANNEL_NAME,
                raw_messages::MESSAGE_DATE,
                raw_messages::MESSAGE_TEXT,
                raw_messages::HAS_MEDIA,
                raw_messages::IMAGE_PATH,
                raw_messages::VIEWS,
                raw_messages::FORWARDS,
                raw_messages::LOADED_AT,
                raw_messages::SOURCE_FILE,
                raw_messages::MESSAGE_ID,
                raw_messages::CHANNEL_NAME,
                raw_messages::MESSAGE_DATE,
                raw_messages::MESSAGE_DATE,
                raw_messages::MESSAGE_TEXT,
                raw_messages::MESSAGE_TEXT,
                raw_messages::HAS_MEDIA,
                raw_messages::HAS_MEDIA,
                raw_messages::IMAGE_PATH,
                raw_messages::IMAGE_PATH,
                raw_messages::VIEWS,
                raw_messages::VIEWS,
                raw_messages::FORWARDS,
                raw_messages::FORWARDS,
                raw_messages::LOADED_AT,
                raw_messages::LOADED_AT,
                raw_messages::SOURCE_FILE,
                raw_messages::SOURCE_FILE,
            ))?;

            for record in &partition.records {
                match InputValidator::validate_message(
                    record,
                    &partition.source_file,
                    self.max_text_length,
                ) {
                    Ok(message) => {
                        stmt.execute(params![
                            message.message_id,
                            message.channel_name,
                            message.message_date,
                            message.message_text,
                            message.has_media,
                            message.image_path,
                            message.views,
                            message.forwards,
                            now,
                            message.source_file,
                        ])?;
                        report.loaded += 1;
                    }
                    Err(e) => {
                        warn!(
                            partition = %partition.source_file,
                            error = %e,
                            "Dropping record failing load contract"
                        );
                        report.rejected += 1;
                    }
                }
            }

            // Advance the watermark under the same transaction as the rows
            // it covers.
            tx.execute(
                &format!(
                    "INSERT INTO {} ({}, {}, {}, {}) VALUES (?, ?, ?, ?) \
                     ON CONFLICT ({}, {}) DO UPDATE SET \
                     {} = excluded.{}, {} = excluded.{}",
                    load_watermarks::TABLE,
                    load_watermarks::CHANNEL_NAME,
                    load_watermarks::PARTITION_DATE,
                    load_watermarks::MESSAGE_COUNT,
                    load_watermarks::LOADED_AT,
                    load_watermarks::CHANNEL_NAME,
                    load_watermarks::PARTITION_DATE,
                    load_watermarks::MESSAGE_COUNT,
                    load_watermarks::MESSAGE_COUNT,
                    load_watermarks::LOADED_AT,
                    load_watermarks::LOADED_AT,
                ),
                params![
                    partition.channel_name,
                    partition.partition_date,
                    report.loaded as i64,
                    now
                ],
            )?;
        }
        tx.commit()?;

        self.metrics
            .record_load(report.loaded, report.rejected, "messages");
        self.metrics.record_partition(partition.channel_name.clone());

        Ok(report)
    }

    /// Load detection batches into the raw store.
    ///
    /// Only records with a positive detection count are retained; the rest
    /// are contract violations and are dropped with a warning.
    pub fn load_detections(
        &self,
        batches: &[DetectionBatch],
        now: NaiveDateTime,
    ) -> Result<LoadReport> {
        let mut conn = self.warehouse.get_connection()?;
        let mut report = LoadReport::default();

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT ({}, {}) DO UPDATE SET \
                 {} = excluded.{}, {} = excluded.{}, {} = excluded.{}, \
                 {} = excluded.{}, {} = excluded.{}, {} = excluded.{}, \
                 {} = excluded.{}, {} = excluded.{}",
                raw_detections::TABLE,
                raw_detections::MESSAGE_ID,
                raw_detections::IMAGE_PATH,
                raw_detections::DETECTION_COUNT,
                raw_detections::DETECTED_CLASSES,
                raw_detections::IMAGE_CATEGORY,
                raw_detections::CONFIDENCE_SCORE,
                raw_detections::HAS_PERSON,
                raw_detections::HAS_PRODUCT,
                raw_detections::PROCESSED_AT,
                raw_detections::LOADED_AT,
                raw_detections::MESSAGE_ID,
                raw_detections::PROCESSED_AT,
                raw_detections::IMAGE_PATH,
                raw_detections::IMAGE_PATH,
                raw_detections::DETECTION_COUNT,
                raw_detections::DETECTION_COUNT,
                raw_detections::DETECTED_CLASSES,
                raw_detections::DETECTED_CLASSES,
                raw_detections::IMAGE_CATEGORY,
                raw_detections::IMAGE_CATEGORY,
                raw_detections::CONFIDENCE_SCORE,
                raw_detections::CONFIDENCE_SCORE,
                raw_detections::HAS_PERSON,
                raw_detections::HAS_PERSON,
                raw_detections::HAS_PRODUCT,
                raw_detections::HAS_PRODUCT,
                raw_detections::LOADED_AT,
                raw_detections::LOADED_AT,
            ))?;

            for batch in batches {
                for record in &batch.records {
                    match InputValidator::validate_detection(record) {
                        Ok(detection) => {
                            stmt.execute(params![
                                detection.message_id,
                                detection.image_path,
                                detection.detection_count,
                                detection.detected_classes,
                                detection.image_category,
                                detection.confidence_score,
                                detection.has_person,
                                detection.has_product,
                                detection.processed_at,
                                now,
                            ])?;
                            report.loaded += 1;
                        }
                        Err(e) => {
                            warn!(
                                file = %batch.source_file,
                                error = %e,
                                "Dropping detection failing load contract"
                            );
                            report.rejected += 1;
                        }
                    }
                }
            }
        }
        tx.commit()?;

        self.metrics
            .record_load(report.loaded, report.rejected, "detections");

        info!(
            loaded = report.loaded,
            rejected = report.rejected,
            "Detection load completed"
        );

        Ok(report)
    }
}
