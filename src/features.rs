//! Consolidated trips to model features.
//!
//! Rows whose pickup or dropoff timestamp is missing are excluded up front.
//! The remaining numeric columns optionally have their gaps filled with the
//! column median, then calendar and duration features plus the `total_fare`
//! target are derived. Timestamps and the store-and-forward flag do not
//! survive into the output.

use chrono::{Datelike, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::trip::RawTripRecord;

pub const TARGET_COLUMN: &str = "total_fare";

pub const FEATURE_COLUMNS: [&str; 22] = [
    "VendorID",
    "passenger_count",
    "trip_distance",
    "RatecodeID",
    "PULocationID",
    "DOLocationID",
    "payment_type",
    "fare_amount",
    "extra",
    "mta_tax",
    "tip_amount",
    "tolls_amount",
    "improvement_surcharge",
    "total_amount",
    "congestion_surcharge",
    "Airport_fee",
    "pickup_hour",
    "pickup_dayofweek",
    "pickup_month",
    "pickup_weekday",
    "trip_duration",
    TARGET_COLUMN,
];

const RAW_NUMERIC_COUNT: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub vendor_id: Option<f64>,
    pub passenger_count: Option<f64>,
    pub trip_distance: Option<f64>,
    pub ratecode_id: Option<f64>,
    pub pu_location_id: Option<f64>,
    pub do_location_id: Option<f64>,
    pub payment_type: Option<f64>,
    pub fare_amount: Option<f64>,
    pub extra: Option<f64>,
    pub mta_tax: Option<f64>,
    pub tip_amount: Option<f64>,
    pub tolls_amount: Option<f64>,
    pub improvement_surcharge: Option<f64>,
    pub total_amount: Option<f64>,
    pub congestion_surcharge: Option<f64>,
    pub airport_fee: Option<f64>,
    pub pickup_hour: u32,
    /// 0 = Monday .. 6 = Sunday.
    pub pickup_dayofweek: u32,
    pub pickup_month: u32,
    pub pickup_weekday: u8,
    /// Minutes from pickup to dropoff; negative when the source clocks disagree.
    pub trip_duration: f64,
    pub total_fare: f64,
}

impl FeatureRecord {
    fn raw_numeric_mut(&mut self) -> [&mut Option<f64>; RAW_NUMERIC_COUNT] {
        [
            &mut self.vendor_id,
            &mut self.passenger_count,
            &mut self.trip_distance,
            &mut self.ratecode_id,
            &mut self.pu_location_id,
            &mut self.do_location_id,
            &mut self.payment_type,
            &mut self.fare_amount,
            &mut self.extra,
            &mut self.mta_tax,
            &mut self.tip_amount,
            &mut self.tolls_amount,
            &mut self.improvement_surcharge,
            &mut self.total_amount,
            &mut self.congestion_surcharge,
            &mut self.airport_fee,
        ]
    }

    fn raw_numeric(&self) -> [Option<f64>; RAW_NUMERIC_COUNT] {
        [
            self.vendor_id,
            self.passenger_count,
            self.trip_distance,
            self.ratecode_id,
            self.pu_location_id,
            self.do_location_id,
            self.payment_type,
            self.fare_amount,
            self.extra,
            self.mta_tax,
            self.tip_amount,
            self.tolls_amount,
            self.improvement_surcharge,
            self.total_amount,
            self.congestion_surcharge,
            self.airport_fee,
        ]
    }

    /// Cells in `FEATURE_COLUMNS` order; missing values render empty.
    pub fn cells(&self) -> Vec<String> {
        let mut cells: Vec<String> = self
            .raw_numeric()
            .iter()
            .map(|value| value.map(|v| v.to_string()).unwrap_or_default())
            .collect();
        cells.extend([
            self.pickup_hour.to_string(),
            self.pickup_dayofweek.to_string(),
            self.pickup_month.to_string(),
            self.pickup_weekday.to_string(),
            self.trip_duration.to_string(),
            self.total_fare.to_string(),
        ]);
        cells
    }

    fn fare_components(&self) -> [Option<f64>; 7] {
        [
            self.fare_amount,
            self.extra,
            self.mta_tax,
            self.improvement_surcharge,
            self.tolls_amount,
            self.congestion_surcharge,
            self.airport_fee,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDataset {
    pub records: Vec<FeatureRecord>,
    pub input_rows: usize,
    pub dropped_invalid_timestamps: usize,
    pub imputed_cells: usize,
}

/// Derives one feature row per trip with valid pickup and dropoff times.
pub fn derive(dataset: &[RawTripRecord], impute_missing: bool) -> FeatureDataset {
    let mut records: Vec<FeatureRecord> = dataset.iter().filter_map(base_record).collect();
    let dropped_invalid_timestamps = dataset.len() - records.len();

    let imputed_cells = if impute_missing {
        fill_with_medians(&mut records)
    } else {
        0
    };

    for record in &mut records {
        record.total_fare = record
            .fare_components()
            .iter()
            .map(|value| present(*value).unwrap_or(0.0))
            .sum();
    }

    info!(
        component = "features",
        event = "features.derive.finish",
        input_rows = dataset.len(),
        dropped_invalid_timestamps,
        imputed_cells,
        output_rows = records.len()
    );

    FeatureDataset {
        records,
        input_rows: dataset.len(),
        dropped_invalid_timestamps,
        imputed_cells,
    }
}

fn base_record(raw: &RawTripRecord) -> Option<FeatureRecord> {
    let pickup = raw.pickup?;
    let dropoff = raw.dropoff?;
    let dayofweek = pickup.weekday().num_days_from_monday();

    Some(FeatureRecord {
        vendor_id: raw.vendor_id.map(|v| v as f64),
        passenger_count: raw.passenger_count,
        trip_distance: raw.trip_distance,
        ratecode_id: raw.ratecode_id.map(|v| v as f64),
        pu_location_id: raw.pu_location_id.map(|v| v as f64),
        do_location_id: raw.do_location_id.map(|v| v as f64),
        payment_type: raw.payment_type.map(|v| v as f64),
        fare_amount: raw.fare_amount,
        extra: raw.extra,
        mta_tax: raw.mta_tax,
        tip_amount: raw.tip_amount,
        tolls_amount: raw.tolls_amount,
        improvement_surcharge: raw.improvement_surcharge,
        total_amount: raw.total_amount,
        congestion_surcharge: raw.congestion_surcharge,
        airport_fee: raw.airport_fee,
        pickup_hour: pickup.hour(),
        pickup_dayofweek: dayofweek,
        pickup_month: pickup.month(),
        pickup_weekday: u8::from(dayofweek < 5),
        trip_duration: duration_minutes(dropoff - pickup),
        total_fare: 0.0,
    })
}

fn duration_minutes(elapsed: TimeDelta) -> f64 {
    match elapsed.num_microseconds() {
        Some(micros) => micros as f64 / 60_000_000.0,
        // Microseconds overflow i64 only past ~292k years.
        None => elapsed.num_seconds() as f64 / 60.0,
    }
}

// NaN cells from parquet count as missing.
fn present(value: Option<f64>) -> Option<f64> {
    value.filter(|v| !v.is_nan())
}

/// Fills gaps in every raw numeric column with that column's median and
/// returns how many cells changed. Columns with no values stay missing.
fn fill_with_medians(records: &mut [FeatureRecord]) -> usize {
    let mut filled = 0;
    for column in 0..RAW_NUMERIC_COUNT {
        let values: Vec<f64> = records
            .iter()
            .filter_map(|record| present(record.raw_numeric()[column]))
            .collect();
        let Some(fill) = median(values) else {
            continue;
        };
        for record in records.iter_mut() {
            let Some(cell) = record.raw_numeric_mut().into_iter().nth(column) else {
                continue;
            };
            if present(*cell).is_none() {
                *cell = Some(fill);
                filled += 1;
            }
        }
    }
    filled
}

pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
