use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub pipeline: PipelineConfig,
    pub warehouse: WarehouseConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Run-lock key; one active run per pipeline name
    pub name: String,
    /// Maximum attempts per stage, including the first
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay
    pub backoff_max_ms: u64,
    /// Bounded timeout per stage attempt
    pub stage_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// First year of the pre-generated date dimension
    pub date_horizon_start_year: i32,
    /// Last year of the pre-generated date dimension (inclusive)
    pub date_horizon_end_year: i32,
    /// Posts at or below this count are Low Activity
    pub low_activity_threshold: i64,
    /// Posts at or below this count are Medium Activity
    pub medium_activity_threshold: i64,
    /// Confidence at or above this is High
    pub high_confidence_threshold: f64,
    /// Confidence at or above this is Medium
    pub medium_confidence_threshold: f64,
    /// Channel-name keywords classified as Pharmaceutical, checked first
    pub pharma_keywords: Vec<String>,
    /// Channel-name keywords classified as Cosmetics, checked second
    pub cosmetics_keywords: Vec<String>,
    /// Message text is truncated to this length at load
    pub max_text_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root of the Collector's partitioned JSON output
    pub messages_dir: String,
    /// Root of the Enricher's detection CSV output
    pub detections_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "data/warehouse.db".to_string(),
                max_connections: 10,
                busy_timeout_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            pipeline: PipelineConfig {
                name: "medtel".to_string(),
                max_attempts: 3,
                backoff_base_ms: 500,
                backoff_max_ms: 60_000,
                stage_timeout_secs: 300,
            },
            warehouse: WarehouseConfig {
                date_horizon_start_year: 2020,
                date_horizon_end_year: 2030,
                low_activity_threshold: 100,
                medium_activity_threshold: 1000,
                high_confidence_threshold: 0.8,
                medium_confidence_threshold: 0.5,
                pharma_keywords: vec![
                    "pharma".to_string(),
                    "med".to_string(),
                    "chemed".to_string(),
                    "drug".to_string(),
                    "tikvah".to_string(),
                ],
                cosmetics_keywords: vec![
                    "cosmetic".to_string(),
                    "beauty".to_string(),
                    "lobelia".to_string(),
                    "skin".to_string(),
                ],
                max_text_length: 10_000,
            },
            ingest: IngestConfig {
                messages_dir: "data/raw/telegram_messages".to_string(),
                detections_dir: "data/processed/yolo_detections".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        // Start with default values
        let mut builder = Config::builder();
        for (key, value) in AppConfig::default() {
            builder = builder
                .set_default(key, value)
                .map_err(|e| anyhow::anyhow!("Failed to set default: {}", e))?;
        }

        let config = builder
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("config").required(false))
            // Add environment variables with prefix
            .add_source(Environment::with_prefix("MEDTEL").separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate database config
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }
        if self.database.busy_timeout_secs == 0 {
            return Err(anyhow::anyhow!("busy_timeout_secs must be greater than 0"));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        // Validate pipeline config
        if self.pipeline.name.trim().is_empty() {
            return Err(anyhow::anyhow!("pipeline name cannot be empty"));
        }
        if self.pipeline.max_attempts == 0 {
            return Err(anyhow::anyhow!("max_attempts must be greater than 0"));
        }
        if self.pipeline.backoff_base_ms == 0 {
            return Err(anyhow::anyhow!("backoff_base_ms must be greater than 0"));
        }
        if self.pipeline.backoff_max_ms < self.pipeline.backoff_base_ms {
            return Err(anyhow::anyhow!(
                "backoff_max_ms must be at least backoff_base_ms"
            ));
        }
        if self.pipeline.stage_timeout_secs == 0 {
            return Err(anyhow::anyhow!("stage_timeout_secs must be greater than 0"));
        }

        // Validate warehouse config
        if self.warehouse.date_horizon_start_year > self.warehouse.date_horizon_end_year {
            return Err(anyhow::anyhow!(
                "date_horizon_start_year must not be after date_horizon_end_year"
            ));
        }
        if self.warehouse.low_activity_threshold >= self.warehouse.medium_activity_threshold {
            return Err(anyhow::anyhow!(
                "low_activity_threshold must be below medium_activity_threshold"
            ));
        }
        if self.warehouse.medium_confidence_threshold >= self.warehouse.high_confidence_threshold {
            return Err(anyhow::anyhow!(
                "medium_confidence_threshold must be below high_confidence_threshold"
            ));
        }
        if !(0.0..=1.0).contains(&self.warehouse.high_confidence_threshold)
            || !(0.0..=1.0).contains(&self.warehouse.medium_confidence_threshold)
        {
            return Err(anyhow::anyhow!(
                "confidence thresholds must be within [0, 1]"
            ));
        }
        if self.warehouse.max_text_length == 0 {
            return Err(anyhow::anyhow!("max_text_length must be greater than 0"));
        }

        Ok(())
    }

    /// Get database URL from environment or config
    #[must_use]
    pub fn get_database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }

    /// Get log level from environment or config
    #[must_use]
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}

impl IntoIterator for AppConfig {
    type Item = (String, config::Value);
    type IntoIter = std::collections::hash_map::IntoIter<String, config::Value>;

    fn into_iter(self) -> Self::IntoIter {
        let mut map = std::collections::HashMap::new();

        // Flatten the configuration into key-value pairs
        map.insert("database.url".to_string(), config::Value::from(self.database.url));
        map.insert("database.max_connections".to_string(), config::Value::from(self.database.max_connections));
        map.insert("database.busy_timeout_secs".to_string(), config::Value::from(self.database.busy_timeout_secs));

        map.insert("logging.level".to_string(), config::Value::from(self.logging.level));
        if let Some(file_path) = self.logging.file_path {
            map.insert("logging.file_path".to_string(), config::Value::from(file_path));
        }
        map.insert("logging.format".to_string(), config::Value::from(self.logging.format));

        map.insert("pipeline.name".to_string(), config::Value::from(self.pipeline.name));
        map.insert("pipeline.max_attempts".to_string(), config::Value::from(self.pipeline.max_attempts));
        map.insert("pipeline.backoff_base_ms".to_string(), config::Value::from(self.pipeline.backoff_base_ms));
        map.insert("pipeline.backoff_max_ms".to_string(), config::Value::from(self.pipeline.backoff_max_ms));
        map.insert("pipeline.stage_timeout_secs".to_string(), config::Value::from(self.pipeline.stage_timeout_secs));

        map.insert("warehouse.date_horizon_start_year".to_string(), config::Value::from(self.warehouse.date_horizon_start_year));
        map.insert("warehouse.date_horizon_end_year".to_string(), config::Value::from(self.warehouse.date_horizon_end_year));
        map.insert("warehouse.low_activity_threshold".to_string(), config::Value::from(self.warehouse.low_activity_threshold));
        map.insert("warehouse.medium_activity_threshold".to_string(), config::Value::from(self.warehouse.medium_activity_threshold));
        map.insert("warehouse.high_confidence_threshold".to_string(), config::Value::from(self.warehouse.high_confidence_threshold));
        map.insert("warehouse.medium_confidence_threshold".to_string(), config::Value::from(self.warehouse.medium_confidence_threshold));
        map.insert(
            "warehouse.pharma_keywords".to_string(),
            config::Value::from(self.warehouse.pharma_keywords.into_iter().map(config::Value::from).collect::<Vec<_>>()),
        );
        map.insert(
            "warehouse.cosmetics_keywords".to_string(),
            config::Value::from(self.warehouse.cosmetics_keywords.into_iter().map(config::Value::from).collect::<Vec<_>>()),
        );
        map.insert("warehouse.max_text_length".to_string(), config::Value::from(self.warehouse.max_text_length as u64));

        map.insert("ingest.messages_dir".to_string(), config::Value::from(self.ingest.messages_dir));
        map.insert("ingest.detections_dir".to_string(), config::Value::from(self.ingest.detections_dir));

        map.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.database.url, "data/warehouse.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.warehouse.low_activity_threshold, 100);
    }

    #[test]
    fn test_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = AppConfig::default();
        config.pipeline.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        let mut config = AppConfig::default();
        config.warehouse.low_activity_threshold = 1000;
        config.warehouse.medium_activity_threshold = 100;
        assert!(config.validate().is_err());
    }
}
