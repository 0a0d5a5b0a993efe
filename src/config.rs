//! Pipeline configuration with environment overrides.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://d37ci6vzurychx.cloudfront.net/trip-data";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub base_url: String,
    pub raw_data_dir: PathBuf,
    pub processed_data_dir: PathBuf,
    pub store_root: PathBuf,
    pub bucket: String,
    pub bucket_versioning: bool,
    pub consolidated_key: String,
    pub features_key: String,
    pub retention_months: u32,
    pub sample_fraction: f64,
    pub test_fraction: f64,
    pub seed: u64,
    pub http_timeout_ms: u64,
    /// Years subtracted from "today" before picking periods. Zero is canonical.
    pub period_year_lag: u32,
    pub impute_missing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            raw_data_dir: PathBuf::from("./data/raw"),
            processed_data_dir: PathBuf::from("./data/processed"),
            store_root: PathBuf::from("./data/store"),
            bucket: "taxi-data".to_string(),
            bucket_versioning: false,
            consolidated_key: "yellow_tripdata_sampled.csv".to_string(),
            features_key: "yellow_tripdata_features.csv".to_string(),
            retention_months: 6,
            sample_fraction: 0.01,
            test_fraction: 0.2,
            seed: 42,
            http_timeout_ms: 120_000,
            period_year_lag: 0,
            impute_missing: true,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid pipeline config: {0}")]
    Invalid(String),
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "sample_fraction must be in (0, 1], got {}",
                self.sample_fraction
            )));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "test_fraction must be in (0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.retention_months == 0 {
            return Err(ConfigError::Invalid(
                "retention_months must be > 0".to_string(),
            ));
        }
        for (name, value) in [
            ("bucket", &self.bucket),
            ("consolidated_key", &self.consolidated_key),
            ("features_key", &self.features_key),
            ("base_url", &self.base_url),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }
}

/// `yellow_tripdata_{year}-{month:02}.parquet`
pub fn snapshot_file_name(year: i32, month: u32) -> String {
    format!("yellow_tripdata_{year}-{month:02}.parquet")
}

pub fn pipeline_config_from_env() -> PipelineConfig {
    let mut config = PipelineConfig::default();

    if let Some(value) = env_string("TAXI_BASE_URL") {
        config.base_url = value;
    }
    if let Some(value) = env_string("TAXI_RAW_DATA_DIR") {
        config.raw_data_dir = PathBuf::from(value);
    }
    if let Some(value) = env_string("TAXI_PROCESSED_DATA_DIR") {
        config.processed_data_dir = PathBuf::from(value);
    }
    if let Some(value) = env_string("TAXI_STORE_ROOT") {
        config.store_root = PathBuf::from(value);
    }
    if let Some(value) = env_string("TAXI_BUCKET") {
        config.bucket = value;
    }
    if let Some(value) = env_string("TAXI_BUCKET_VERSIONING").and_then(|raw| parse_bool(&raw)) {
        config.bucket_versioning = value;
    }
    if let Some(value) = env_string("TAXI_CONSOLIDATED_KEY") {
        config.consolidated_key = value;
    }
    if let Some(value) = env_string("TAXI_FEATURES_KEY") {
        config.features_key = value;
    }
    if let Some(value) = env_parsed("TAXI_RETENTION_MONTHS") {
        config.retention_months = value;
    }
    if let Some(value) = env_parsed("TAXI_SAMPLE_FRACTION") {
        config.sample_fraction = value;
    }
    if let Some(value) = env_parsed("TAXI_TEST_FRACTION") {
        config.test_fraction = value;
    }
    if let Some(value) = env_parsed("TAXI_SEED") {
        config.seed = value;
    }
    if let Some(value) = env_parsed("TAXI_HTTP_TIMEOUT_MS") {
        config.http_timeout_ms = value;
    }
    if let Some(value) = env_parsed("TAXI_PERIOD_YEAR_LAG") {
        config.period_year_lag = value;
    }
    if let Some(value) = env_string("TAXI_IMPUTE_MISSING").and_then(|raw| parse_bool(&raw)) {
        config.impute_missing = value;
    }

    config
}

fn env_string(key: &str) -> Option<String> {
    let raw = env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|raw| raw.parse().ok())
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_env {
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    /// Runs `f` with each var set (`Some`) or removed (`None`), then restores
    /// the previous values. Every env-mutating test in the crate goes through
    /// this lock.
    pub(crate) fn with_env_vars<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let previous: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, _)| ((*key).to_string(), env::var(key).ok()))
            .collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let output = f();

        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        output
    }
}
