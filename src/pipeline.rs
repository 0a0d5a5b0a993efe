//! Run driver: monthly ingestion loop plus the feature/split build.

use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{ConfigError, PipelineConfig};
use crate::consolidate::integrate_snapshot;
use crate::features::derive;
use crate::object_store::{ObjectStore, StorageError, VersioningStatus};
use crate::snapshot::{target_periods, FetchError, Period, SnapshotSource};
use crate::split::{split, Table};
use crate::trip::{read_trips_csv, DatasetError, DROPOFF_COLUMN, PICKUP_COLUMN};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("consolidated dataset {bucket}/{key} does not exist")]
    ConsolidatedMissing { bucket: String, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeriodOutcome {
    Consolidated {
        sampled_rows: u64,
        retained_rows: u64,
        pruned_rows: u64,
    },
    FetchFailed {
        reason: String,
    },
    ConsolidationFailed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodReport {
    pub period: Period,
    pub outcome: PeriodOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub periods: Vec<PeriodReport>,
    pub versioning: Option<VersioningStatus>,
}

impl IngestionReport {
    pub fn consolidated_periods(&self) -> usize {
        self.periods
            .iter()
            .filter(|report| matches!(report.outcome, PeriodOutcome::Consolidated { .. }))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureBuildReport {
    pub input_rows: usize,
    pub dropped_invalid_timestamps: usize,
    pub output_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub failed_uploads: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub ingestion: IngestionReport,
    pub features: FeatureBuildReport,
}

/// Collaborators are injected so a run never reaches for process-global state.
pub struct Pipeline<'a> {
    cfg: PipelineConfig,
    store: &'a dyn ObjectStore,
    source: &'a dyn SnapshotSource,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        cfg: PipelineConfig,
        store: &'a dyn ObjectStore,
        source: &'a dyn SnapshotSource,
    ) -> Result<Self, PipelineError> {
        cfg.validate()?;
        Ok(Self { cfg, store, source })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Fetches and consolidates the two most recently completed months, the
    /// latest first. A failure for one period is recorded and the next period
    /// still runs.
    pub fn run_ingestion(&self, today: NaiveDate) -> IngestionReport {
        let bucket = self.cfg.bucket.as_str();
        if self.cfg.bucket_versioning {
            if let Err(err) = self.store.enable_versioning(bucket) {
                warn!(
                    component = "pipeline",
                    event = "ingest.versioning.failed",
                    bucket,
                    error = %err
                );
            }
        }

        let periods = target_periods(today, self.cfg.period_year_lag);
        info!(
            component = "pipeline",
            event = "ingest.start",
            today = %today,
            latest_period = %periods[0],
            earlier_period = %periods[1]
        );

        let mut reports = Vec::with_capacity(periods.len());
        for period in periods {
            let outcome = self.ingest_period(period);
            reports.push(PeriodReport { period, outcome });
        }

        let versioning = match self.store.versioning_status(bucket) {
            Ok(status) => status,
            Err(err) => {
                warn!(
                    component = "pipeline",
                    event = "ingest.versioning.status_failed",
                    bucket,
                    error = %err
                );
                None
            }
        };

        let report = IngestionReport {
            periods: reports,
            versioning,
        };
        info!(
            component = "pipeline",
            event = "ingest.finish",
            bucket,
            consolidated_periods = report.consolidated_periods(),
            versioning = ?report.versioning
        );
        report
    }

    fn ingest_period(&self, period: Period) -> PeriodOutcome {
        info!(
            component = "pipeline",
            event = "ingest.period.start",
            period = %period
        );

        let snapshot_path = match self.source.fetch(period) {
            Ok(path) => path,
            Err(err) => {
                warn!(
                    component = "pipeline",
                    event = "ingest.fetch.failed",
                    period = %period,
                    error = %err
                );
                return PeriodOutcome::FetchFailed {
                    reason: err.to_string(),
                };
            }
        };

        match integrate_snapshot(self.store, &self.cfg, &snapshot_path) {
            Ok(report) => PeriodOutcome::Consolidated {
                sampled_rows: report.sampled_rows,
                retained_rows: report.retained_rows,
                pruned_rows: report.pruned_rows,
            },
            Err(err) => {
                error!(
                    component = "pipeline",
                    event = "ingest.consolidate.failed",
                    period = %period,
                    error = %err
                );
                PeriodOutcome::ConsolidationFailed {
                    reason: err.to_string(),
                }
            }
        }
    }

    pub fn run_feature_build(&self) -> Result<FeatureBuildReport, PipelineError> {
        build_feature_artifacts(self.store, &self.cfg)
    }

    pub fn run(&self, today: NaiveDate) -> Result<RunReport, PipelineError> {
        let ingestion = self.run_ingestion(today);
        let features = self.run_feature_build()?;
        Ok(RunReport {
            ingestion,
            features,
        })
    }
}

/// Rebuilds the feature table and the four split artifacts from whatever
/// consolidated dataset is currently stored. Upload failures are recorded per
/// artifact; schema and split errors abort the build.
///
/// Needs no snapshot source, so a feature-only process can call it directly.
pub fn build_feature_artifacts(
    store: &dyn ObjectStore,
    cfg: &PipelineConfig,
) -> Result<FeatureBuildReport, PipelineError> {
    let local_csv = cfg.raw_data_dir.join(&cfg.consolidated_key);
    if !store.get(&cfg.bucket, &cfg.consolidated_key, &local_csv)? {
        error!(
            component = "pipeline",
            event = "features.consolidated.missing",
            bucket = %cfg.bucket,
            key = %cfg.consolidated_key
        );
        return Err(PipelineError::ConsolidatedMissing {
            bucket: cfg.bucket.clone(),
            key: cfg.consolidated_key.clone(),
        });
    }

    let records = read_trips_csv(&local_csv, &[PICKUP_COLUMN, DROPOFF_COLUMN])?;
    let dataset = derive(&records, cfg.impute_missing);
    let table = Table::from_features(&dataset.records);

    let mut failed_uploads = Vec::new();
    let features_path = cfg.processed_data_dir.join(&cfg.features_key);
    table.write_csv(&features_path)?;
    upload(store, cfg, &features_path, &cfg.features_key, &mut failed_uploads);

    let partitions = split(&table, cfg.test_fraction, cfg.seed)?;
    for (key, path) in partitions.write_all(&cfg.processed_data_dir)? {
        upload(store, cfg, &path, key, &mut failed_uploads);
    }

    let report = FeatureBuildReport {
        input_rows: dataset.input_rows,
        dropped_invalid_timestamps: dataset.dropped_invalid_timestamps,
        output_rows: table.len(),
        train_rows: partitions.x_train.len(),
        test_rows: partitions.x_test.len(),
        failed_uploads,
    };
    info!(
        component = "pipeline",
        event = "features.build.finish",
        input_rows = report.input_rows,
        output_rows = report.output_rows,
        train_rows = report.train_rows,
        test_rows = report.test_rows,
        failed_uploads = report.failed_uploads.len()
    );
    Ok(report)
}

fn upload(
    store: &dyn ObjectStore,
    cfg: &PipelineConfig,
    path: &Path,
    key: &str,
    failed: &mut Vec<String>,
) {
    if let Err(err) = store.put(path, &cfg.bucket, key) {
        warn!(
            component = "pipeline",
            event = "features.upload.failed",
            bucket = %cfg.bucket,
            key,
            error = %err
        );
        failed.push(key.to_string());
    }
}
