use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use medtel_warehouse::db::Warehouse;
use medtel_warehouse::loader::Loader;
use medtel_warehouse::models::{DetectionBatch, DetectionRecord, MessagePartition, RawMessageRecord};

fn test_warehouse() -> (tempfile::TempDir, Warehouse) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let warehouse = Warehouse::new(
        &db_path.display().to_string(),
        2,
        Duration::from_secs(5),
    )
    .expect("Failed to create warehouse");
    (dir, warehouse)
}

fn ts(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 7, 1)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .expect("valid timestamp")
}

fn message(id: i64, channel: &str) -> RawMessageRecord {
    RawMessageRecord {
        message_id: Some(id),
        channel_name: Some(channel.to_string()),
        message_date: Some(ts(9)),
        message_text: Some(format!("message {id}")),
        has_media: false,
        image_path: None,
        views: Some(100),
        forwards: Some(4),
    }
}

fn partition(channel: &str, records: Vec<RawMessageRecord>) -> MessagePartition {
    MessagePartition {
        channel_name: channel.to_string(),
        partition_date: NaiveDate::from_ymd_opt(2025, 7, 1).expect("valid date"),
        source_file: format!("2025-07-01/{channel}.json"),
        records,
    }
}

fn raw_message_count(warehouse: &Warehouse) -> i64 {
    let conn = warehouse.get_connection().expect("connection");
    conn.query_row("SELECT COUNT(*) FROM raw_messages", [], |row| row.get(0))
        .expect("count query")
}

#[test]
fn test_loading_same_batch_twice_is_idempotent() {
    let (_dir, warehouse) = test_warehouse();
    let loader = Loader::new(&warehouse, 10_000);

    let batch = vec![partition(
        "tikvah_pharma",
        vec![message(1, "tikvah_pharma"), message(2, "tikvah_pharma")],
    )];

    let first = loader.load_messages(&batch, ts(10)).expect("first load");
    assert_eq!(first.loaded, 2);
    assert_eq!(first.new_partitions, 1);
    assert_eq!(raw_message_count(&warehouse), 2);

    let second = loader.load_messages(&batch, ts(11)).expect("second load");
    assert_eq!(second.loaded, 2);
    assert_eq!(second.reprocessed_partitions, 1);
    assert_eq!(second.new_partitions, 0);

    // Same content as loading once
    assert_eq!(raw_message_count(&warehouse), 2);
}

#[test]
fn test_invalid_records_dropped_without_aborting_batch() {
    let (_dir, warehouse) = test_warehouse();
    let loader = Loader::new(&warehouse, 10_000);

    let mut no_id = message(3, "chemed");
    no_id.message_id = None;
    let mut no_channel = message(4, "chemed");
    no_channel.channel_name = None;
    let mut no_date = message(5, "chemed");
    no_date.message_date = None;

    let batch = vec![partition(
        "chemed",
        vec![message(1, "chemed"), no_id, no_channel, no_date, message(2, "chemed")],
    )];

    let report = loader.load_messages(&batch, ts(10)).expect("load");
    assert_eq!(report.loaded, 2);
    assert_eq!(report.rejected, 3);
    assert_eq!(raw_message_count(&warehouse), 2);
}

#[test]
fn test_reload_overwrites_by_natural_key() {
    let (_dir, warehouse) = test_warehouse();
    let loader = Loader::new(&warehouse, 10_000);

    loader
        .load_messages(&[partition("chemed", vec![message(1, "chemed")])], ts(10))
        .expect("first load");

    let mut updated = message(1, "chemed");
    updated.views = Some(999);
    loader
        .load_messages(&[partition("chemed", vec![updated])], ts(11))
        .expect("second load");

    let conn = warehouse.get_connection().expect("connection");
    let views: i64 = conn
        .query_row(
            "SELECT views FROM raw_messages WHERE message_id = 1 AND channel_name = 'chemed'",
            [],
            |row| row.get(0),
        )
        .expect("views query");
    assert_eq!(views, 999);
    assert_eq!(raw_message_count(&warehouse), 1);
}

#[test]
fn test_same_message_id_in_two_channels_is_two_records() {
    let (_dir, warehouse) = test_warehouse();
    let loader = Loader::new(&warehouse, 10_000);

    let batch = vec![
        partition("chemed", vec![message(1, "chemed")]),
        partition("tikvah_pharma", vec![message(1, "tikvah_pharma")]),
    ];

    let report = loader.load_messages(&batch, ts(10)).expect("load");
    assert_eq!(report.loaded, 2);
    assert_eq!(raw_message_count(&warehouse), 2);
}

#[test]
fn test_zero_detection_records_not_retained() {
    let (_dir, warehouse) = test_warehouse();
    let loader = Loader::new(&warehouse, 10_000);

    let records = vec![
        DetectionRecord {
            message_id: Some(1),
            image_path: "images/1.jpg".to_string(),
            detection_count: 2,
            detected_classes: "bottle, person".to_string(),
            image_category: "promotional".to_string(),
            confidence_score: 0.9,
            has_person: true,
            has_product: true,
            processed_at: Some(ts(10)),
        },
        DetectionRecord {
            message_id: Some(2),
            image_path: "images/2.jpg".to_string(),
            detection_count: 0,
            detected_classes: String::new(),
            image_category: "other".to_string(),
            confidence_score: 0.0,
            has_person: false,
            has_product: false,
            processed_at: Some(ts(10)),
        },
    ];

    let batch = DetectionBatch {
        source_file: "latest_detections.csv".to_string(),
        records,
    };

    let report = loader.load_detections(&[batch], ts(11)).expect("load");
    assert_eq!(report.loaded, 1);
    assert_eq!(report.rejected, 1);

    let conn = warehouse.get_connection().expect("connection");
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM raw_detections", [], |row| row.get(0))
        .expect("count query");
    assert_eq!(count, 1);
}

#[test]
fn test_detection_load_is_idempotent() {
    let (_dir, warehouse) = test_warehouse();
    let loader = Loader::new(&warehouse, 10_000);

    let batch = DetectionBatch {
        source_file: "latest_detections.csv".to_string(),
        records: vec![DetectionRecord {
            message_id: Some(1),
            image_path: "images/1.jpg".to_string(),
            detection_count: 1,
            detected_classes: "bottle".to_string(),
            image_category: "product_display".to_string(),
            confidence_score: 0.7,
            has_person: false,
            has_product: true,
            processed_at: Some(ts(10)),
        }],
    };

    loader
        .load_detections(std::slice::from_ref(&batch), ts(11))
        .expect("first load");
    loader
        .load_detections(std::slice::from_ref(&batch), ts(12))
        .expect("second load");

    let conn = warehouse.get_connection().expect("connection");
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM raw_detections", [], |row| row.get(0))
        .expect("count query");
    assert_eq!(count, 1);
}
