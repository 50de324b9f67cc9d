//! Fact builders.
//!
//! Message facts join cleaned raw messages to the channel and date
//! dimensions with outer-join semantics: a missing dimension row yields a
//! NULL key, never a dropped message. Detection facts inherit their keys
//! through the parent message fact and carry the -1 sentinel when that
//! parent has not been built, so detection analytics survive out-of-order
//! stage completion. Each build replaces its target table inside one
//! transaction; readers never observe a half-written table.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDateTime, Timelike};
use rusqlite::params;
use tracing::info;

use crate::config::WarehouseConfig;
use crate::db::Warehouse;
use crate::dimensions::date_key;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::models::{DetectionFactRow, MessageFactRow, UNRESOLVED_KEY};
use crate::schema::{
    dim_channels, dim_dates, fct_image_detections, fct_messages, raw_detections, raw_messages,
};
use crate::utils::{round2, surrogate_key};

/// Forwards as a percentage of views, rounded to two decimals.
///
/// Zero when there are no views; never divides by zero.
#[must_use]
pub fn forward_rate(views: i64, forwards: i64) -> f64 {
    if views > 0 {
        round2(forwards as f64 / views as f64 * 100.0)
    } else {
        0.0
    }
}

/// Four-bucket time-of-day label from an hour in [0, 23].
///
/// The buckets are mutually exclusive and exhaustive over the day.
#[must_use]
pub fn time_of_day(hour: u32) -> &'static str {
    match hour {
        6..=12 => "Morning",
        13..=18 => "Afternoon",
        19..=23 => "Evening",
        _ => "Night",
    }
}

/// Map an Enricher image category to its content strategy.
#[must_use]
pub fn content_strategy(category: &str) -> &'static str {
    match category {
        "promotional" => "Product Promotion",
        "product_display" => "Product Showcase",
        "lifestyle" => "Lifestyle Content",
        _ => "General Content",
    }
}

/// Tier a confidence score against the configured thresholds.
#[must_use]
pub fn confidence_level(score: f64, high_threshold: f64, medium_threshold: f64) -> &'static str {
    if score >= high_threshold {
        "High"
    } else if score >= medium_threshold {
        "Medium"
    } else {
        "Low"
    }
}

/// Surrogate key for a detection fact, derived from its natural key.
#[must_use]
pub fn detection_key(message_id: i64, processed_at: NaiveDateTime) -> i64 {
    surrogate_key(&format!("{message_id}:{processed_at}"))
}

struct RawMessageSnapshot {
    message_id: i64,
    channel_name: String,
    message_date: NaiveDateTime,
    message_text: String,
    has_media: bool,
    views: i64,
    forwards: i64,
}

struct RawDetectionSnapshot {
    message_id: i64,
    image_path: String,
    detection_count: i64,
    detected_classes: String,
    image_category: String,
    confidence_score: f64,
    has_person: bool,
    has_product: bool,
    processed_at: NaiveDateTime,
}

pub struct FactBuilder<'a> {
    warehouse: &'a Warehouse,
    config: &'a WarehouseConfig,
    metrics: MetricsCollector,
}

impl<'a> FactBuilder<'a> {
    #[must_use]
    pub fn new(warehouse: &'a Warehouse, config: &'a WarehouseConfig) -> Self {
        Self {
            warehouse,
            config,
            metrics: MetricsCollector::default(),
        }
    }

    /// Rebuild the message fact table from the raw store.
    pub fn build_message_facts(&self, now: NaiveDateTime) -> Result<u64> {
        let mut conn = self.warehouse.get_connection()?;

        // Snapshot inputs: raw messages plus the dimension lookups
        let messages = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {}, {}, {}, {}, {}, {}, {} FROM {} ORDER BY {}, {}",
                raw_messages::MESSAGE_ID,
                raw_messages::CHANNEL_NAME,
                raw_messages::MESSAGE_DATE,
                raw_messages::MESSAGE_TEXT,
                raw_messages::HAS_MEDIA,
                raw_messages::VIEWS,
                raw_messages::FORWARDS,
                raw_messages::TABLE,
                raw_messages::MESSAGE_ID,
                raw_messages::CHANNEL_NAME,
            ))?;

            let rows = stmt.query_map(params![], |row| {
                Ok(RawMessageSnapshot {
                    message_id: row.get(0)?,
                    channel_name: row.get(1)?,
                    message_date: row.get(2)?,
                    message_text: row.get(3)?,
                    has_media: row.get(4)?,
                    views: row.get(5)?,
                    forwards: row.get(6)?,
                })
            })?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            messages
        };

        let channel_keys: HashMap<String, i64> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {}, {} FROM {}",
                dim_channels::CHANNEL_NAME,
                dim_channels::CHANNEL_KEY,
                dim_channels::TABLE,
            ))?;
            let rows = stmt.query_map(params![], |row| Ok((row.get(0)?, row.get(1)?)))?;

            let mut keys = HashMap::new();
            for row in rows {
                let (name, key): (String, i64) = row?;
                keys.insert(name, key);
            }
            keys
        };

        let known_dates: HashSet<i64> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM {}",
                dim_dates::DATE_KEY,
                dim_dates::TABLE,
            ))?;
            let rows = stmt.query_map(params![], |row| row.get::<_, i64>(0))?;

            let mut dates = HashSet::new();
            for row in rows {
                dates.insert(row?);
            }
            dates
        };

        // Pure transformation: one fact row per message identifier.
        // The natural key is (message_id, channel), so an id reused across
        // channels resolves to the first channel in name order.
        let mut seen = HashSet::new();
        let facts: Vec<MessageFactRow> = messages
            .into_iter()
            .filter(|m| seen.insert(m.message_id))
            .map(|m| {
                let candidate_date_key = date_key(m.message_date.date());
                MessageFactRow {
                    message_id: m.message_id,
                    channel_key: channel_keys.get(&m.channel_name).copied(),
                    date_key: known_dates
                        .contains(&candidate_date_key)
                        .then_some(candidate_date_key),
                    message_length: m.message_text.chars().count() as i64,
                    forward_rate: forward_rate(m.views, m.forwards),
                    hour_of_day: i64::from(m.message_date.hour()),
                    time_of_day: time_of_day(m.message_date.hour()).to_string(),
                    message_text: m.message_text,
                    view_count: m.views,
                    forward_count: m.forwards,
                    has_image: m.has_media,
                    loaded_at: now,
                }
            })
            .collect();

        // Commit step: replace the table contents atomically
        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {}", fct_messages::TABLE), params![])?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                fct_messages::TABLE,
                fct_messages::MESSAGE_ID,
                fct_messages::CHANNEL_KEY,
                fct_messages::DATE_KEY,
                fct_messages::MESSAGE_TEXT,
                fct_messages::MESSAGE_LENGTH,
                fct_messages::VIEW_COUNT,
                fct_messages::FORWARD_COUNT,
                fct_messages::HAS_IMAGE,
                fct_messages::FORWARD_RATE,
                fct_messages::HOUR_OF_DAY,
                fct_messages::TIME_OF_DAY,
                fct_messages::LOADED_AT,
            ))?;

            for fact in &facts {
                stmt.execute(params![
                    fact.message_id,
                    fact.channel_key,
                    fact.date_key,
                    fact.message_text,
                    fact.message_length,
                    fact.view_count,
                    fact.forward_count,
                    fact.has_image,
                    fact.forward_rate,
                    fact.hour_of_day,
                    fact.time_of_day,
                    fact.loaded_at,
                ])?;
            }
        }
        tx.commit()?;

        let rows = facts.len() as u64;
        self.metrics.record_fact_build("fct_messages", rows);
        info!(rows, "Message facts rebuilt");

        Ok(rows)
    }

    /// Rebuild the detection fact table from the raw store.
    ///
    /// A detection whose parent message fact is absent keeps the -1
    /// sentinel on both dimension keys; a parent whose own key is NULL
    /// contributes the sentinel too, since these columns are non-null.
    pub fn build_detection_facts(&self, now: NaiveDateTime) -> Result<u64> {
        let mut conn = self.warehouse.get_connection()?;

        let detections = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {}, {}, {}, {}, {}, {}, {}, {}, {} FROM {} WHERE {} > 0 \
                 ORDER BY {}, {}",
                raw_detections::MESSAGE_ID,
                raw_detections::IMAGE_PATH,
                raw_detections::DETECTION_COUNT,
                raw_detections::DETECTED_CLASSES,
                raw_detections::IMAGE_CATEGORY,
                raw_detections::CONFIDENCE_SCORE,
                raw_detections::HAS_PERSON,
                raw_detections::HAS_PRODUCT,
                raw_detections::PROCESSED_AT,
                raw_detections::TABLE,
                raw_detections::DETECTION_COUNT,
                raw_detections::MESSAGE_ID,
                raw_detections::PROCESSED_AT,
            ))?;

            let rows = stmt.query_map(params![], |row| {
                Ok(RawDetectionSnapshot {
                    message_id: row.get(0)?,
                    image_path: row.get(1)?,
                    detection_count: row.get(2)?,
                    detected_classes: row.get(3)?,
                    image_category: row.get(4)?,
                    confidence_score: row.get(5)?,
                    has_person: row.get(6)?,
                    has_product: row.get(7)?,
                    processed_at: row.get(8)?,
                })
            })?;

            let mut detections = Vec::new();
            for row in rows {
                detections.push(row?);
            }
            detections
        };

        let parent_keys: HashMap<i64, (Option<i64>, Option<i64>)> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {}, {}, {} FROM {}",
                fct_messages::MESSAGE_ID,
                fct_messages::CHANNEL_KEY,
                fct_messages::DATE_KEY,
                fct_messages::TABLE,
            ))?;
            let rows =
                stmt.query_map(params![], |row| Ok((row.get(0)?, (row.get(1)?, row.get(2)?))))?;

            let mut keys = HashMap::new();
            for row in rows {
                let (message_id, dims): (i64, (Option<i64>, Option<i64>)) = row?;
                keys.insert(message_id, dims);
            }
            keys
        };

        // Pure transformation
        let facts: Vec<DetectionFactRow> = detections
            .into_iter()
            .map(|d| {
                let (channel_key, dim_date_key) = parent_keys
                    .get(&d.message_id)
                    .map_or((UNRESOLVED_KEY, UNRESOLVED_KEY), |(ck, dk)| {
                        (ck.unwrap_or(UNRESOLVED_KEY), dk.unwrap_or(UNRESOLVED_KEY))
                    });

                DetectionFactRow {
                    detection_key: detection_key(d.message_id, d.processed_at),
                    message_id: d.message_id,
                    channel_key,
                    date_key: dim_date_key,
                    content_strategy: content_strategy(&d.image_category).to_string(),
                    confidence_level: confidence_level(
                        d.confidence_score,
                        self.config.high_confidence_threshold,
                        self.config.medium_confidence_threshold,
                    )
                    .to_string(),
                    image_path: d.image_path,
                    detection_count: d.detection_count,
                    detected_classes: d.detected_classes,
                    image_category: d.image_category,
                    confidence_score: d.confidence_score,
                    has_person: d.has_person,
                    has_product: d.has_product,
                    processed_at: d.processed_at,
                    loaded_at: now,
                }
            })
            .collect();

        // Commit step: replace the table contents atomically
        let tx = conn.transaction()?;
        tx.execute(
            &format!("DELETE FROM {}", fct_image_detections::TABLE),
            params![],
        )?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                fct_image_detections::TABLE,
                fct_image_detections::DETECTION_KEY,
                fct_image_detections::MESSAGE_ID,
                fct_image_detections::CHANNEL_KEY,
                fct_image_detections::DATE_KEY,
                fct_image_detections::IMAGE_PATH,
                fct_image_detections::DETECTION_COUNT,
                fct_image_detections::DETECTED_CLASSES,
                fct_image_detections::IMAGE_CATEGORY,
                fct_image_detections::CONFIDENCE_SCORE,
                fct_image_detections::HAS_PERSON,
                fct_image_detections::HAS_PRODUCT,
                fct_image_detections::CONTENT_STRATEGY,
                fct_image_detections::CONFIDENCE_LEVEL,
                fct_image_detections::PROCESSED_AT,
                fct_image_detections::LOADED_AT,
            ))?;

            for fact in &facts {
                stmt.execute(params![
                    fact.detection_key,
                    fact.message_id,
                    fact.channel_key,
                    fact.date_key,
                    fact.image_path,
                    fact.detection_count,
                    fact.detected_classes,
                    fact.image_category,
                    fact.confidence_score,
                    fact.has_person,
                    fact.has_product,
                    fact.content_strategy,
                    fact.confidence_level,
                    fact.processed_at,
                    fact.loaded_at,
                ])?;
            }
        }
        tx.commit()?;

        let rows = facts.len() as u64;
        self.metrics.record_fact_build("fct_image_detections", rows);
        info!(rows, "Detection facts rebuilt");

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_rate_rounds_to_two_decimals() {
        assert!((forward_rate(1200, 15) - 1.25).abs() < f64::EPSILON);
        assert!((forward_rate(3, 1) - 33.33).abs() < f64::EPSILON);
    }

    #[test]
    fn test_forward_rate_zero_views() {
        assert!((forward_rate(0, 5) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_time_of_day_buckets() {
        assert_eq!(time_of_day(6), "Morning");
        assert_eq!(time_of_day(12), "Morning");
        assert_eq!(time_of_day(13), "Afternoon");
        assert_eq!(time_of_day(18), "Afternoon");
        assert_eq!(time_of_day(19), "Evening");
        assert_eq!(time_of_day(23), "Evening");
        assert_eq!(time_of_day(0), "Night");
        assert_eq!(time_of_day(5), "Night");
    }

    #[test]
    fn test_content_strategy_mapping() {
        assert_eq!(content_strategy("promotional"), "Product Promotion");
        assert_eq!(content_strategy("product_display"), "Product Showcase");
        assert_eq!(content_strategy("lifestyle"), "Lifestyle Content");
        assert_eq!(content_strategy("other"), "General Content");
        assert_eq!(content_strategy("unexpected"), "General Content");
    }

    #[test]
    fn test_confidence_tiers() {
        assert_eq!(confidence_level(0.9, 0.8, 0.5), "High");
        assert_eq!(confidence_level(0.8, 0.8, 0.5), "High");
        assert_eq!(confidence_level(0.6, 0.8, 0.5), "Medium");
        assert_eq!(confidence_level(0.2, 0.8, 0.5), "Low");
    }

    #[test]
    fn test_detection_key_is_stable_and_non_negative() {
        let processed = chrono::NaiveDate::from_ymd_opt(2025, 7, 1)
            .and_then(|d| d.and_hms_opt(10, 0, 0))
            .expect("valid timestamp");
        let a = detection_key(42, processed);
        let b = detection_key(42, processed);
        assert_eq!(a, b);
        assert!(a >= 0);
        assert_ne!(a, UNRESOLVED_KEY);
    }
}
