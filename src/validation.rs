use anyhow::{anyhow, Result};

use crate::error::WarehouseError;
use crate::models::{DetectionRecord, NewRawDetection, NewRawMessage, RawMessageRecord};

/// Validation for ingested records and operator-supplied values.
///
/// Record checks enforce the load contract: a failing record is dropped and
/// logged by the Loader, it never aborts the batch.
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a Collector message record against the load contract.
    ///
    /// Rejects records with a null message identifier, channel or timestamp.
    /// Returns the validated record ready for insertion.
    pub fn validate_message(
        record: &RawMessageRecord,
        source_file: &str,
        max_text_length: usize,
    ) -> std::result::Result<NewRawMessage, WarehouseError> {
        let message_id = record.message_id.ok_or_else(|| {
            WarehouseError::ContractViolation("message with null message_id".to_string())
        })?;

        let channel_name = record
            .channel_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                WarehouseError::ContractViolation(format!(
                    "message {message_id} with null channel"
                ))
            })?;

        let message_date = record.message_date.ok_or_else(|| {
            WarehouseError::ContractViolation(format!(
                "message {message_id} with null timestamp"
            ))
        })?;

        let mut message_text = record.message_text.clone().unwrap_or_default();
        if message_text.chars().count() > max_text_length {
            message_text = message_text.chars().take(max_text_length).collect();
        }

        Ok(NewRawMessage {
            message_id,
            channel_name: channel_name.to_string(),
            message_date,
            message_text,
            has_media: record.has_media,
            image_path: record.image_path.clone(),
            views: record.views.unwrap_or(0).max(0),
            forwards: record.forwards.unwrap_or(0).max(0),
            source_file: source_file.to_string(),
        })
    }

    /// Validate an Enricher detection record against the load contract.
    ///
    /// Rejects records with a null message identifier or processing
    /// timestamp, a confidence outside [0,1], or no detected objects
    /// (zero-detection images are not retained).
    pub fn validate_detection(
        record: &DetectionRecord,
    ) -> std::result::Result<NewRawDetection, WarehouseError> {
        let message_id = record.message_id.ok_or_else(|| {
            WarehouseError::ContractViolation("detection with null message_id".to_string())
        })?;

        let processed_at = record.processed_at.ok_or_else(|| {
            WarehouseError::ContractViolation(format!(
                "detection for message {message_id} with null processed_at"
            ))
        })?;

        if record.detection_count <= 0 {
            return Err(WarehouseError::ContractViolation(format!(
                "detection for message {message_id} with no detected objects"
            )));
        }

        if !(0.0..=1.0).contains(&record.confidence_score) {
            return Err(WarehouseError::ContractViolation(format!(
                "detection for message {message_id} with confidence {} outside [0,1]",
                record.confidence_score
            )));
        }

        Ok(NewRawDetection {
            message_id,
            image_path: record.image_path.clone(),
            detection_count: record.detection_count,
            detected_classes: record.detected_classes.clone(),
            image_category: record.image_category.clone(),
            confidence_score: record.confidence_score,
            has_person: record.has_person,
            has_product: record.has_product,
            processed_at,
        })
    }

    /// Validate a channel name supplied on the command line.
    pub fn validate_channel_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(anyhow!("Channel name cannot be empty"));
        }

        if name.len() > 255 {
            return Err(anyhow!("Channel name too long (max 255 characters)"));
        }

        if name.contains('\0') || name.contains('\r') || name.contains('\n') {
            return Err(anyhow!("Channel name contains invalid characters"));
        }

        Ok(())
    }

    /// Validate a database URL.
    pub fn validate_database_url(url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(anyhow!("Database URL cannot be empty"));
        }

        if url.len() > 1000 {
            return Err(anyhow!("Database URL too long"));
        }

        Ok(())
    }
}
