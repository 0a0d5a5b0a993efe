//! Taxi-trip data pipeline core crate.
//!
//! - monthly snapshot retrieval and period selection
//! - sampled consolidation into a rolling six-month dataset
//! - feature derivation and seeded train/test partitioning
//! - filesystem object store standing in for the shared bucket

mod config;
mod consolidate;
mod features;
mod object_store;
mod observability;
mod pipeline;
mod snapshot;
mod split;
mod trip;

pub use config::{
    pipeline_config_from_env, snapshot_file_name, ConfigError, PipelineConfig, DEFAULT_BASE_URL,
};
pub use consolidate::{
    apply_retention, consolidate, integrate_snapshot, retention_cutoff, sample_batch,
    Consolidation, ConsolidationConfig, ConsolidationReport,
};
pub use features::{
    derive, median, FeatureDataset, FeatureRecord, FEATURE_COLUMNS, TARGET_COLUMN,
};
pub use object_store::{LocalObjectStore, ObjectStore, StorageError, VersioningStatus};
pub use observability::{
    init_logging, log_app_start, log_pipeline_config, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    build_feature_artifacts, FeatureBuildReport, IngestionReport, PeriodOutcome, PeriodReport, Pipeline, PipelineError,
    RunReport,
};
pub use snapshot::{
    target_periods, FetchError, HttpFetcher, HttpSnapshotSource, Period, ReqwestBlockingFetcher,
    SnapshotSource,
};
pub use split::{
    split, SplitDataset, Table, LEAKAGE_COLUMN, X_TEST_KEY, X_TRAIN_KEY, Y_TEST_KEY, Y_TRAIN_KEY,
};
pub use trip::{
    format_timestamp, parse_timestamp, read_snapshot_parquet, read_trips_csv, require_columns,
    write_trips_csv, DatasetError, RawTripRecord, DROPOFF_COLUMN, PICKUP_COLUMN, RAW_COLUMNS,
    STORE_AND_FWD_COLUMN,
};
