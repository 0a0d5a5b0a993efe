//! Incremental merge of sampled monthly snapshots into the rolling dataset.

use std::path::Path;

use chrono::{Months, NaiveDateTime};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::object_store::ObjectStore;
use crate::pipeline::PipelineError;
use crate::trip::{
    read_snapshot_parquet, read_trips_csv, write_trips_csv, RawTripRecord, PICKUP_COLUMN,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsolidationConfig {
    pub sample_fraction: f64,
    pub seed: u64,
    pub retention_months: u32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            sample_fraction: 0.01,
            seed: 42,
            retention_months: 6,
        }
    }
}

impl From<&PipelineConfig> for ConsolidationConfig {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            sample_fraction: cfg.sample_fraction,
            seed: cfg.seed,
            retention_months: cfg.retention_months,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub existing_rows: u64,
    pub new_rows: u64,
    pub sampled_rows: u64,
    pub retained_rows: u64,
    pub pruned_rows: u64,
    pub latest_pickup: Option<NaiveDateTime>,
    pub window_start: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Consolidation {
    pub records: Vec<RawTripRecord>,
    pub report: ConsolidationReport,
}

/// Uniform sample without replacement of `round(fraction * len)` rows.
///
/// The same `(batch, fraction, seed)` always yields the same rows in the same
/// order.
pub fn sample_batch(batch: Vec<RawTripRecord>, fraction: f64, seed: u64) -> Vec<RawTripRecord> {
    let len = batch.len();
    let amount = ((fraction * len as f64).round_ties_even().max(0.0) as usize).min(len);
    let mut rng = StdRng::seed_from_u64(seed);
    let picked = rand::seq::index::sample(&mut rng, len, amount);

    let mut slots: Vec<Option<RawTripRecord>> = batch.into_iter().map(Some).collect();
    picked
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}

/// Earliest pickup kept for a dataset whose newest pickup is `latest`.
///
/// Calendar-month arithmetic: the day is clamped to the target month's
/// length, so 2024-08-31 minus six months is 2024-02-29.
pub fn retention_cutoff(latest: NaiveDateTime, months: u32) -> Option<NaiveDateTime> {
    latest.checked_sub_months(Months::new(months))
}

/// Keeps rows with `pickup >= max(pickup) - months`. Rows without a pickup
/// timestamp never satisfy the window and are dropped.
pub fn apply_retention(
    records: Vec<RawTripRecord>,
    months: u32,
) -> (Vec<RawTripRecord>, Option<NaiveDateTime>, Option<NaiveDateTime>) {
    let latest = records.iter().filter_map(|record| record.pickup).max();
    let cutoff = latest.and_then(|latest| retention_cutoff(latest, months));

    let retained = match cutoff {
        Some(cutoff) => records
            .into_iter()
            .filter(|record| record.pickup.is_some_and(|pickup| pickup >= cutoff))
            .collect(),
        None => Vec::new(),
    };

    (retained, latest, cutoff)
}

/// Appends a sample of `new_batch` after `existing` and prunes the result to
/// the retention window. An absent `existing` dataset is treated as empty.
pub fn consolidate(
    existing: Option<Vec<RawTripRecord>>,
    new_batch: Vec<RawTripRecord>,
    cfg: &ConsolidationConfig,
) -> Consolidation {
    let mut combined = existing.unwrap_or_default();
    let existing_rows = combined.len() as u64;
    let new_rows = new_batch.len() as u64;

    let sampled = sample_batch(new_batch, cfg.sample_fraction, cfg.seed);
    let sampled_rows = sampled.len() as u64;
    combined.extend(sampled);
    let combined_rows = combined.len() as u64;

    let (records, latest_pickup, window_start) = apply_retention(combined, cfg.retention_months);
    let retained_rows = records.len() as u64;

    let report = ConsolidationReport {
        existing_rows,
        new_rows,
        sampled_rows,
        retained_rows,
        pruned_rows: combined_rows - retained_rows,
        latest_pickup,
        window_start,
    };

    debug!(
        component = "consolidate",
        event = "consolidate.merge",
        existing_rows,
        new_rows,
        sampled_rows,
        retained_rows,
        pruned_rows = report.pruned_rows
    );

    Consolidation { records, report }
}

/// Read-modify-write of the persisted dataset for one downloaded snapshot.
///
/// A missing dataset bootstraps an empty one; a storage failure aborts the
/// merge so the previous dataset is never replaced by a partial one.
pub fn integrate_snapshot(
    store: &dyn ObjectStore,
    cfg: &PipelineConfig,
    snapshot_path: &Path,
) -> Result<ConsolidationReport, PipelineError> {
    let local_csv = cfg.raw_data_dir.join(&cfg.consolidated_key);

    let existing = if store.get(&cfg.bucket, &cfg.consolidated_key, &local_csv)? {
        let records = read_trips_csv(&local_csv, &[PICKUP_COLUMN])?;
        info!(
            component = "consolidate",
            event = "consolidate.existing.loaded",
            bucket = %cfg.bucket,
            key = %cfg.consolidated_key,
            rows = records.len()
        );
        Some(records)
    } else {
        info!(
            component = "consolidate",
            event = "consolidate.existing.bootstrap",
            bucket = %cfg.bucket,
            key = %cfg.consolidated_key
        );
        None
    };

    let new_batch = read_snapshot_parquet(snapshot_path)?;
    let Consolidation { records, report } =
        consolidate(existing, new_batch, &ConsolidationConfig::from(cfg));

    write_trips_csv(&local_csv, &records)?;
    store.put(&local_csv, &cfg.bucket, &cfg.consolidated_key)?;

    info!(
        component = "consolidate",
        event = "consolidate.finish",
        snapshot = %snapshot_path.display(),
        existing_rows = report.existing_rows,
        sampled_rows = report.sampled_rows,
        retained_rows = report.retained_rows,
        pruned_rows = report.pruned_rows,
        latest_pickup = ?report.latest_pickup,
        window_start = ?report.window_start
    );

    Ok(report)
}
