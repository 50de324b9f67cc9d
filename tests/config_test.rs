use medtel_warehouse::config::AppConfig;

#[test]
fn test_default_configuration_is_valid() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.pipeline.name, "medtel");
    assert_eq!(config.warehouse.low_activity_threshold, 100);
    assert_eq!(config.warehouse.medium_activity_threshold, 1000);
}

#[test]
fn test_keyword_lists_are_ordered_pharma_first() {
    let config = AppConfig::default();
    assert!(config
        .warehouse
        .pharma_keywords
        .iter()
        .any(|k| k == "pharma"));
    assert!(config
        .warehouse
        .cosmetics_keywords
        .iter()
        .any(|k| k == "cosmetic"));
}

#[test]
fn test_backoff_bounds_are_validated() {
    let mut config = AppConfig::default();
    config.pipeline.backoff_base_ms = 1000;
    config.pipeline.backoff_max_ms = 10;
    assert!(config.validate().is_err());
}

#[test]
fn test_date_horizon_is_validated() {
    let mut config = AppConfig::default();
    config.warehouse.date_horizon_start_year = 2031;
    config.warehouse.date_horizon_end_year = 2020;
    assert!(config.validate().is_err());
}

#[test]
fn test_confidence_thresholds_are_validated() {
    let mut config = AppConfig::default();
    config.warehouse.medium_confidence_threshold = 0.9;
    config.warehouse.high_confidence_threshold = 0.8;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.warehouse.high_confidence_threshold = 1.5;
    assert!(config.validate().is_err());
}

#[test]
fn test_database_url_environment_override() {
    let config = AppConfig::default();
    std::env::set_var("DATABASE_URL", "sqlite:/tmp/override.db");
    assert_eq!(config.get_database_url(), "sqlite:/tmp/override.db");
    std::env::remove_var("DATABASE_URL");
    assert_eq!(config.get_database_url(), config.database.url);
}
