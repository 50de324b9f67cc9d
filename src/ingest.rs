//! Readers for Collector and Enricher output.
//!
//! The Collector writes one JSON file per channel per calendar day under
//! `<root>/<YYYY-MM-DD>/<channel>.json`, each holding a `messages` array.
//! The Enricher writes CSV files of detection records. Both readers skip
//! unparseable files with a warning; re-reading the same files is safe
//! because the Loader upserts by natural key.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{DetectionBatch, DetectionRecord, MessagePartition, RawMessageRecord};

#[derive(Debug, Deserialize)]
struct PartitionFile {
    messages: Vec<RawMessageRecord>,
}

/// Read all message partitions under the Collector output root.
///
/// Partitions are returned sorted by (date, channel) so repeated ingestion
/// walks them in a deterministic order.
pub fn read_message_partitions(root: &Path) -> Result<Vec<MessagePartition>> {
    let mut partitions = Vec::new();

    if !root.exists() {
        warn!(root = %root.display(), "Collector output directory does not exist");
        return Ok(partitions);
    }

    for day_entry in std::fs::read_dir(root)? {
        let day_dir = day_entry?.path();
        if !day_dir.is_dir() {
            continue;
        }

        let dir_name = day_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let Ok(partition_date) = NaiveDate::parse_from_str(&dir_name, "%Y-%m-%d") else {
            warn!(directory = %dir_name, "Skipping directory with non-date name");
            continue;
        };

        for file_entry in std::fs::read_dir(&day_dir)? {
            let file_path = file_entry?.path();
            if file_path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let channel_name = file_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let source_file = format!("{dir_name}/{channel_name}.json");

            match read_partition_file(&file_path) {
                Ok(records) => {
                    debug!(
                        partition = %source_file,
                        records = records.len(),
                        "Read message partition"
                    );
                    partitions.push(MessagePartition {
                        channel_name,
                        partition_date,
                        source_file,
                        records,
                    });
                }
                Err(e) => {
                    warn!(partition = %source_file, error = %e, "Skipping unreadable partition");
                }
            }
        }
    }

    partitions.sort_by(|a, b| {
        (a.partition_date, &a.channel_name).cmp(&(b.partition_date, &b.channel_name))
    });

    Ok(partitions)
}

fn read_partition_file(path: &Path) -> Result<Vec<RawMessageRecord>> {
    let file = File::open(path)?;
    let parsed: PartitionFile = serde_json::from_reader(BufReader::new(file))?;
    Ok(parsed.messages)
}

/// Read all detection CSV files under the Enricher output root.
///
/// Overlapping files (e.g. a timestamped export plus a `latest` copy) are
/// harmless: duplicate records collapse on the raw store's natural key.
pub fn read_detection_batches(root: &Path) -> Result<Vec<DetectionBatch>> {
    let mut batches = Vec::new();

    if !root.exists() {
        warn!(root = %root.display(), "Enricher output directory does not exist");
        return Ok(batches);
    }

    let mut csv_files = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("csv") {
            csv_files.push(path);
        }
    }
    csv_files.sort();

    for path in csv_files {
        let source_file = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        match read_detection_file(&path) {
            Ok(records) => {
                debug!(file = %source_file, records = records.len(), "Read detection batch");
                batches.push(DetectionBatch {
                    source_file,
                    records,
                });
            }
            Err(e) => {
                warn!(file = %source_file, error = %e, "Skipping unreadable detection file");
            }
        }
    }

    Ok(batches)
}

fn read_detection_file(path: &Path) -> Result<Vec<DetectionRecord>> {
    let mut reader = csv::Reader::from_path(path)?;

    let mut records = Vec::new();
    for record in reader.deserialize() {
        let record: DetectionRecord = record?;
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_roots_yield_empty() {
        let missing = Path::new("/nonexistent/collector-output");
        assert!(read_message_partitions(missing)
            .expect("missing root is not an error")
            .is_empty());
        assert!(read_detection_batches(missing)
            .expect("missing root is not an error")
            .is_empty());
    }

    #[test]
    fn test_partition_layout_is_parsed() {
        let root = tempfile::tempdir().expect("tempdir");
        let day_dir = root.path().join("2025-07-01");
        std::fs::create_dir_all(&day_dir).expect("create day dir");

        let mut file =
            File::create(day_dir.join("tikvah_pharma.json")).expect("create partition");
        write!(
            file,
            r#"{{"messages": [{{"message_id": 1, "channel_name": "tikvah_pharma",
                "message_date": "2025-07-01T09:30:00", "message_text": "hi",
                "views": 10, "forwards": 1}}]}}"#
        )
        .expect("write partition");

        let partitions =
            read_message_partitions(root.path()).expect("partitions should parse");
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].channel_name, "tikvah_pharma");
        assert_eq!(partitions[0].records.len(), 1);
        assert_eq!(
            partitions[0].partition_date,
            NaiveDate::from_ymd_opt(2025, 7, 1).expect("valid date")
        );
    }

    #[test]
    fn test_detection_csv_is_parsed() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut file =
            File::create(root.path().join("latest_detections.csv")).expect("create csv");
        writeln!(
            file,
            "message_id,image_path,detection_count,detected_classes,image_category,confidence_score,has_person,has_product,processed_at"
        )
        .expect("write header");
        writeln!(
            file,
            "1,images/1.jpg,2,\"bottle, person\",promotional,0.87,true,true,2025-07-01T10:00:00"
        )
        .expect("write row");

        let batches = read_detection_batches(root.path()).expect("batches should parse");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].records.len(), 1);
        assert_eq!(batches[0].records[0].image_category, "promotional");
    }
}
