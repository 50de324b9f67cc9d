//! Dimension builders.
//!
//! The channel dimension is fully recomputed from the raw store on each run
//! (delete and rebuild, committed atomically) so late corrections in raw
//! data are always reflected. Surrogate keys are stable hashes of the
//! channel name, which keeps fact joins valid across rebuilds. The date
//! dimension is generated once over a fixed configured horizon and is
//! idempotent to regenerate.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rusqlite::params;
use tracing::info;

use crate::config::WarehouseConfig;
use crate::db::Warehouse;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::models::{ChannelDimRow, DateDimRow};
use crate::schema::{dim_channels, dim_dates, raw_messages};
use crate::utils::{round2, surrogate_key};

/// Classify a channel from its name against ordered keyword lists.
///
/// Lists are checked in order and the first match wins; a name matching
/// both the pharmaceutical and cosmetics lists resolves to the first.
/// Names matching neither default to the generic category.
#[must_use]
pub fn classify_channel(name: &str, pharma: &[String], cosmetics: &[String]) -> &'static str {
    let lowered = name.to_lowercase();

    if pharma.iter().any(|kw| lowered.contains(kw.as_str())) {
        "Pharmaceutical"
    } else if cosmetics.iter().any(|kw| lowered.contains(kw.as_str())) {
        "Cosmetics"
    } else {
        "General Health"
    }
}

/// Derive the three-level activity tier from a channel's post count.
#[must_use]
pub fn activity_level(total_posts: i64, low_threshold: i64, medium_threshold: i64) -> &'static str {
    if total_posts <= low_threshold {
        "Low Activity"
    } else if total_posts <= medium_threshold {
        "Medium Activity"
    } else {
        "High Activity"
    }
}

/// Label fixed-date holidays.
#[must_use]
pub fn holiday_label(date: NaiveDate) -> Option<&'static str> {
    match (date.month(), date.day()) {
        (1, 1) => Some("New Year's Day"),
        (1, 7) => Some("Ethiopian Christmas"),
        (1, 19) => Some("Timkat"),
        (9, 11) => Some("Enkutatash"),
        (12, 25) => Some("Christmas Day"),
        _ => None,
    }
}

/// Posting aggregates for one channel, from the primary grouping.
#[derive(Debug, Clone)]
struct ChannelStats {
    channel_name: String,
    total_posts: i64,
    first_post: NaiveDateTime,
    last_post: NaiveDateTime,
    total_views: i64,
    avg_views: f64,
    total_forwards: i64,
    avg_forwards: f64,
}

/// Content aggregates for one channel, from the secondary grouping.
#[derive(Debug, Clone, Copy, Default)]
struct ChannelActivity {
    avg_message_length: f64,
    image_post_count: i64,
}

/// Derive channel dimension rows from the two groupings.
///
/// Left-join semantics: a channel present in the stats grouping but absent
/// from the activity grouping still appears, with zeroed content
/// aggregates.
fn build_channel_rows(
    stats: Vec<ChannelStats>,
    activity: &HashMap<String, ChannelActivity>,
    config: &WarehouseConfig,
    now: NaiveDateTime,
) -> Vec<ChannelDimRow> {
    stats
        .into_iter()
        .map(|s| {
            let extra = activity.get(&s.channel_name).copied().unwrap_or_default();
            ChannelDimRow {
                channel_key: surrogate_key(&s.channel_name),
                channel_type: classify_channel(
                    &s.channel_name,
                    &config.pharma_keywords,
                    &config.cosmetics_keywords,
                )
                .to_string(),
                activity_level: activity_level(
                    s.total_posts,
                    config.low_activity_threshold,
                    config.medium_activity_threshold,
                )
                .to_string(),
                first_post_date: s.first_post.date(),
                last_post_date: s.last_post.date(),
                total_posts: s.total_posts,
                total_views: s.total_views,
                avg_views: round2(s.avg_views),
                total_forwards: s.total_forwards,
                avg_forwards: round2(s.avg_forwards),
                avg_message_length: round2(extra.avg_message_length),
                image_post_count: extra.image_post_count,
                channel_name: s.channel_name,
                loaded_at: now,
            }
        })
        .collect()
}

pub struct DimensionBuilder<'a> {
    warehouse: &'a Warehouse,
    config: &'a WarehouseConfig,
    metrics: MetricsCollector,
}

impl<'a> DimensionBuilder<'a> {
    #[must_use]
    pub fn new(warehouse: &'a Warehouse, config: &'a WarehouseConfig) -> Self {
        Self {
            warehouse,
            config,
            metrics: MetricsCollector::default(),
        }
    }

    /// Rebuild the channel dimension from the raw store.
    ///
    /// The previous materialization stays visible until the rebuild
    /// transaction commits.
    pub fn build_channel_dimension(&self, now: NaiveDateTime) -> Result<u64> {
        let mut conn = self.warehouse.get_connection()?;

        // Primary grouping: posting aggregates per channel
        let stats = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ch}, COUNT(*), MIN({date}), MAX({date}), \
                 COALESCE(SUM({views}), 0), COALESCE(AVG({views}), 0), \
                 COALESCE(SUM({fwd}), 0), COALESCE(AVG({fwd}), 0) \
                 FROM {table} GROUP BY {ch} ORDER BY {ch}",
                ch = raw_messages::CHANNEL_NAME,
                date = raw_messages::MESSAGE_DATE,
                views = raw_messages::VIEWS,
                fwd = raw_messages::FORWARDS,
                table = raw_messages::TABLE,
            ))?;

            let rows = stmt.query_map(params![], |row| {
                Ok(ChannelStats {
                    channel_name: row.get(0)?,
                    total_posts: row.get(1)?,
                    first_post: row.get(2)?,
                    last_post: row.get(3)?,
                    total_views: row.get(4)?,
                    avg_views: row.get(5)?,
                    total_forwards: row.get(6)?,
                    avg_forwards: row.get(7)?,
                })
            })?;

            let mut stats = Vec::new();
            for row in rows {
                stats.push(row?);
            }
            stats
        };

        // Secondary grouping: content aggregates per channel
        let activity = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ch}, COALESCE(AVG(LENGTH({text})), 0), \
                 COALESCE(SUM(CASE WHEN {media} THEN 1 ELSE 0 END), 0) \
                 FROM {table} GROUP BY {ch}",
                ch = raw_messages::CHANNEL_NAME,
                text = raw_messages::MESSAGE_TEXT,
                media = raw_messages::HAS_MEDIA,
                table = raw_messages::TABLE,
            ))?;

            let rows = stmt.query_map(params![], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ChannelActivity {
                        avg_message_length: row.get(1)?,
                        image_post_count: row.get(2)?,
                    },
                ))
            })?;

            let mut activity = HashMap::new();
            for row in rows {
                let (channel, extra) = row?;
                activity.insert(channel, extra);
            }
            activity
        };

        let dimension = build_channel_rows(stats, &activity, self.config, now);

        // Commit step: delete and rebuild atomically
        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {}", dim_channels::TABLE), params![])?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                dim_channels::TABLE,
                dim_channels::CHANNEL_KEY,
                dim_channels::CHANNEL_NAME,
                dim_channels::CHANNEL_TYPE,
                dim_channels::FIRST_POST_DATE,
                dim_channels::LAST_POST_DATE,
                dim_channels::TOTAL_POSTS,
                dim_channels::TOTAL_VIEWS,
                dim_channels::AVG_VIEWS,
                dim_channels::TOTAL_FORWARDS,
                dim_channels::AVG_FORWARDS,
                dim_channels::AVG_MESSAGE_LENGTH,
                dim_channels::IMAGE_POST_COUNT,
                dim_channels::ACTIVITY_LEVEL,
                dim_channels::LOADED_AT,
            ))?;

            for row in &dimension {
                stmt.execute(params![
                    row.channel_key,
                    row.channel_name,
                    row.channel_type,
                    row.first_post_date,
                    row.last_post_date,
                    row.total_posts,
                    row.total_views,
                    row.avg_views,
                    row.total_forwards,
                    row.avg_forwards,
                    row.avg_message_length,
                    row.image_post_count,
                    row.activity_level,
                    row.loaded_at,
                ])?;
            }
        }
        tx.commit()?;

        let rows = dimension.len() as u64;
        self.metrics.record_dimension_build("dim_channels", rows);
        info!(rows, "Channel dimension rebuilt");

        Ok(rows)
    }

    /// Generate the date dimension over the configured horizon.
    ///
    /// Static reference data: rows already present are left untouched, so
    /// regeneration over the same horizon is a no-op.
    pub fn build_date_dimension(&self) -> Result<u64> {
        let rows = generate_date_rows(
            self.config.date_horizon_start_year,
            self.config.date_horizon_end_year,
        )?;

        let mut conn = self.warehouse.get_connection()?;
        let tx = conn.transaction()?;
        let mut inserted = 0u64;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT ({}) DO NOTHING",
                dim_dates::TABLE,
                dim_dates::DATE_KEY,
                dim_dates::FULL_DATE,
                dim_dates::YEAR,
                dim_dates::QUARTER,
                dim_dates::MONTH,
                dim_dates::MONTH_NAME,
                dim_dates::WEEK_OF_YEAR,
                dim_dates::DAY_OF_WEEK,
                dim_dates::DAY_NAME,
                dim_dates::IS_WEEKEND,
                dim_dates::HOLIDAY,
                dim_dates::DATE_KEY,
            ))?;

            for row in &rows {
                inserted += stmt.execute(params![
                    row.date_key,
                    row.full_date,
                    row.year,
                    row.quarter,
                    row.month,
                    row.month_name,
                    row.week_of_year,
                    row.day_of_week,
                    row.day_name,
                    row.is_weekend,
                    row.holiday,
                ])? as u64;
            }
        }
        tx.commit()?;

        self.metrics
            .record_dimension_build("dim_dates", rows.len() as u64);
        info!(
            generated = rows.len(),
            inserted, "Date dimension generated"
        );

        Ok(inserted)
    }
}

/// Encode a calendar date as its YYYYMMDD surrogate key.
#[must_use]
pub fn date_key(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day())
}

/// Generate date dimension rows for the year horizon (inclusive).
pub fn generate_date_rows(start_year: i32, end_year: i32) -> Result<Vec<DateDimRow>> {
    let start = NaiveDate::from_ymd_opt(start_year, 1, 1).ok_or_else(|| {
        crate::error::WarehouseError::InvalidDate(format!("invalid start year {start_year}"))
    })?;
    let end = NaiveDate::from_ymd_opt(end_year, 12, 31).ok_or_else(|| {
        crate::error::WarehouseError::InvalidDate(format!("invalid end year {end_year}"))
    })?;

    let rows = start
        .iter_days()
        .take_while(|date| *date <= end)
        .map(|date| {
            let weekday = date.weekday();
            DateDimRow {
                date_key: date_key(date),
                full_date: date,
                year: date.year(),
                quarter: i64::from((date.month() - 1) / 3 + 1),
                month: i64::from(date.month()),
                month_name: date.format("%B").to_string(),
                week_of_year: i64::from(date.iso_week().week()),
                day_of_week: i64::from(weekday.number_from_monday()),
                day_name: date.format("%A").to_string(),
                is_weekend: matches!(weekday, chrono::Weekday::Sat | chrono::Weekday::Sun),
                holiday: holiday_label(date).map(ToString::to_string),
            }
        })
        .collect();

    Ok(rows)
}
