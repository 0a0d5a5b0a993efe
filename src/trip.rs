//! Raw taxi-trip records and their on-disk codecs.
//!
//! Monthly snapshots arrive as parquet; the consolidated dataset is persisted
//! as CSV with a fixed header. Timestamp cells that fail to parse become
//! `None` instead of failing the read.

use std::fs;
use std::path::{Path, PathBuf};

use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, Int64Type, TimestampMicrosecondType};
use arrow_array::{Array, ArrayRef, ArrowPrimitiveType, PrimitiveArray, RecordBatch, StringArray};
use arrow_cast::cast;
use arrow_schema::{ArrowError, DataType, TimeUnit};
use chrono::{DateTime, NaiveDateTime};
use csv::StringRecord;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::errors::ParquetError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const PICKUP_COLUMN: &str = "tpep_pickup_datetime";
pub const DROPOFF_COLUMN: &str = "tpep_dropoff_datetime";
pub const STORE_AND_FWD_COLUMN: &str = "store_and_fwd_flag";

pub const RAW_COLUMNS: [&str; 19] = [
    "VendorID",
    PICKUP_COLUMN,
    DROPOFF_COLUMN,
    "passenger_count",
    "trip_distance",
    "RatecodeID",
    STORE_AND_FWD_COLUMN,
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
];

const TIMESTAMP_WRITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIMESTAMP_PARSE_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// One observed trip as published in the TLC yellow-cab snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTripRecord {
    #[serde(rename = "VendorID", default, deserialize_with = "int_cell::deserialize")]
    pub vendor_id: Option<i64>,
    #[serde(rename = "tpep_pickup_datetime", default, with = "timestamp_cell")]
    pub pickup: Option<NaiveDateTime>,
    #[serde(rename = "tpep_dropoff_datetime", default, with = "timestamp_cell")]
    pub dropoff: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub passenger_count: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub trip_distance: Option<f64>,
    #[serde(rename = "RatecodeID", default, deserialize_with = "int_cell::deserialize")]
    pub ratecode_id: Option<i64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub store_and_fwd_flag: Option<String>,
    #[serde(rename = "PULocationID", default, deserialize_with = "int_cell::deserialize")]
    pub pu_location_id: Option<i64>,
    #[serde(rename = "DOLocationID", default, deserialize_with = "int_cell::deserialize")]
    pub do_location_id: Option<i64>,
    #[serde(default, deserialize_with = "int_cell::deserialize")]
    pub payment_type: Option<i64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub fare_amount: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub extra: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub mta_tax: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub tip_amount: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub tolls_amount: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub improvement_surcharge: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub total_amount: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub congestion_surcharge: Option<f64>,
    #[serde(
        rename = "Airport_fee",
        alias = "airport_fee",
        default,
        deserialize_with = "csv::invalid_option"
    )]
    pub airport_fee: Option<f64>,
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("schema error: required column '{column}' missing from {context}")]
    Schema { column: String, context: String },
    #[error("cannot split {rows} rows with test fraction {test_fraction}")]
    InvalidSplit { rows: usize, test_fraction: f64 },
    #[error("invalid output path: {0}")]
    InvalidPath(PathBuf),
}

/// Parses a timestamp cell; anything unrecognised yields `None`.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in TIMESTAMP_PARSE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(ts);
        }
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|ts| ts.naive_utc())
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_WRITE_FORMAT).to_string()
}

pub fn require_columns(
    headers: &StringRecord,
    required: &[&str],
    context: &str,
) -> Result<(), DatasetError> {
    for column in required {
        if !headers.iter().any(|header| header == *column) {
            return Err(DatasetError::Schema {
                column: (*column).to_string(),
                context: context.to_string(),
            });
        }
    }
    Ok(())
}

/// Reads a persisted trip CSV. A zero-byte file is an empty dataset.
pub fn read_trips_csv(
    path: &Path,
    required_columns: &[&str],
) -> Result<Vec<RawTripRecord>, DatasetError> {
    if fs::metadata(path)?.len() == 0 {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    require_columns(&headers, required_columns, &path.display().to_string())?;

    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }

    debug!(
        component = "trip",
        event = "trip.csv.read",
        path = %path.display(),
        rows = records.len()
    );

    Ok(records)
}

pub fn write_trips_csv(path: &Path, records: &[RawTripRecord]) -> Result<(), DatasetError> {
    write_csv_atomic(path, |writer| {
        writer.write_record(RAW_COLUMNS)?;
        for record in records {
            writer.serialize(record)?;
        }
        Ok(())
    })
}

/// Writes through a sibling `.tmp` file and renames it into place, so readers
/// never observe a truncated artifact.
pub(crate) fn write_csv_atomic(
    path: &Path,
    write: impl FnOnce(&mut csv::Writer<fs::File>) -> Result<(), DatasetError>,
) -> Result<(), DatasetError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| DatasetError::InvalidPath(path.to_path_buf()))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    let result = (|| -> Result<(), DatasetError> {
        let file = fs::File::create(&tmp_path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        write(&mut writer)?;
        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Decodes a monthly snapshot. Only the pickup column is mandatory; other
/// known columns missing from an older schema decode as `None`.
pub fn read_snapshot_parquet(path: &Path) -> Result<Vec<RawTripRecord>, DatasetError> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let has_pickup = builder
        .schema()
        .fields()
        .iter()
        .any(|field| field.name().eq_ignore_ascii_case(PICKUP_COLUMN));
    if !has_pickup {
        return Err(DatasetError::Schema {
            column: PICKUP_COLUMN.to_string(),
            context: path.display().to_string(),
        });
    }

    let reader = builder.build()?;
    let mut records = Vec::new();
    for batch in reader {
        decode_batch(&batch?, &mut records)?;
    }

    debug!(
        component = "trip",
        event = "trip.parquet.read",
        path = %path.display(),
        rows = records.len()
    );

    Ok(records)
}

fn decode_batch(batch: &RecordBatch, out: &mut Vec<RawTripRecord>) -> Result<(), DatasetError> {
    let pickup = timestamp_column(batch, PICKUP_COLUMN)?;
    let dropoff = timestamp_column(batch, DROPOFF_COLUMN)?;
    let vendor_id = int_column(batch, "VendorID")?;
    let passenger_count = float_column(batch, "passenger_count")?;
    let trip_distance = float_column(batch, "trip_distance")?;
    let ratecode_id = int_column(batch, "RatecodeID")?;
    let store_and_fwd_flag = string_column(batch, STORE_AND_FWD_COLUMN)?;
    let pu_location_id = int_column(batch, "PULocationID")?;
    let do_location_id = int_column(batch, "DOLocationID")?;
    let payment_type = int_column(batch, "payment_type")?;
    let fare_amount = float_column(batch, "fare_amount")?;
    let extra = float_column(batch, "extra")?;
    let mta_tax = float_column(batch, "mta_tax")?;
    let tip_amount = float_column(batch, "tip_amount")?;
    let tolls_amount = float_column(batch, "tolls_amount")?;
    let improvement_surcharge = float_column(batch, "improvement_surcharge")?;
    let total_amount = float_column(batch, "total_amount")?;
    let congestion_surcharge = float_column(batch, "congestion_surcharge")?;
    let airport_fee = float_column(batch, "Airport_fee")?;

    out.reserve(batch.num_rows());
    for row in 0..batch.num_rows() {
        out.push(RawTripRecord {
            vendor_id: value_at(vendor_id.as_ref(), row),
            pickup: value_at(pickup.as_ref(), row).and_then(micros_to_naive),
            dropoff: value_at(dropoff.as_ref(), row).and_then(micros_to_naive),
            passenger_count: value_at(passenger_count.as_ref(), row),
            trip_distance: value_at(trip_distance.as_ref(), row),
            ratecode_id: value_at(ratecode_id.as_ref(), row),
            store_and_fwd_flag: string_at(store_and_fwd_flag.as_ref(), row),
            pu_location_id: value_at(pu_location_id.as_ref(), row),
            do_location_id: value_at(do_location_id.as_ref(), row),
            payment_type: value_at(payment_type.as_ref(), row),
            fare_amount: value_at(fare_amount.as_ref(), row),
            extra: value_at(extra.as_ref(), row),
            mta_tax: value_at(mta_tax.as_ref(), row),
            tip_amount: value_at(tip_amount.as_ref(), row),
            tolls_amount: value_at(tolls_amount.as_ref(), row),
            improvement_surcharge: value_at(improvement_surcharge.as_ref(), row),
            total_amount: value_at(total_amount.as_ref(), row),
            congestion_surcharge: value_at(congestion_surcharge.as_ref(), row),
            airport_fee: value_at(airport_fee.as_ref(), row),
        });
    }

    Ok(())
}

// Column names drift in case across years (`Airport_fee` / `airport_fee`).
fn find_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a ArrayRef> {
    let index = batch
        .schema()
        .fields()
        .iter()
        .position(|field| field.name().eq_ignore_ascii_case(name))?;
    Some(batch.column(index))
}

fn cast_column(
    batch: &RecordBatch,
    name: &str,
    to_type: &DataType,
) -> Result<Option<ArrayRef>, DatasetError> {
    match find_column(batch, name) {
        Some(column) => Ok(Some(cast(column.as_ref(), to_type)?)),
        None => Ok(None),
    }
}

fn float_column(
    batch: &RecordBatch,
    name: &str,
) -> Result<Option<PrimitiveArray<Float64Type>>, DatasetError> {
    Ok(cast_column(batch, name, &DataType::Float64)?
        .map(|array| array.as_primitive::<Float64Type>().clone()))
}

fn int_column(
    batch: &RecordBatch,
    name: &str,
) -> Result<Option<PrimitiveArray<Int64Type>>, DatasetError> {
    Ok(cast_column(batch, name, &DataType::Int64)?
        .map(|array| array.as_primitive::<Int64Type>().clone()))
}

fn timestamp_column(
    batch: &RecordBatch,
    name: &str,
) -> Result<Option<PrimitiveArray<TimestampMicrosecondType>>, DatasetError> {
    Ok(
        cast_column(batch, name, &DataType::Timestamp(TimeUnit::Microsecond, None))?
            .map(|array| array.as_primitive::<TimestampMicrosecondType>().clone()),
    )
}

fn string_column(batch: &RecordBatch, name: &str) -> Result<Option<StringArray>, DatasetError> {
    Ok(cast_column(batch, name, &DataType::Utf8)?.map(|array| array.as_string::<i32>().clone()))
}

fn value_at<T: ArrowPrimitiveType>(
    column: Option<&PrimitiveArray<T>>,
    row: usize,
) -> Option<T::Native> {
    let column = column?;
    if column.is_null(row) {
        None
    } else {
        Some(column.value(row))
    }
}

fn string_at(column: Option<&StringArray>, row: usize) -> Option<String> {
    let column = column?;
    if column.is_null(row) {
        None
    } else {
        Some(column.value(row).to_string())
    }
}

fn micros_to_naive(micros: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros).map(|ts| ts.naive_utc())
}

mod timestamp_cell {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&super::format_timestamp(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(super::parse_timestamp))
    }
}

// Integer columns come back as "1.0" once a null forced them through floats.
mod int_cell {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }

    fn parse(raw: &str) -> Option<i64> {
        let trimmed = raw.trim();
        if let Ok(value) = trimmed.parse::<i64>() {
            return Some(value);
        }
        let value = trimmed.parse::<f64>().ok()?;
        if value.is_finite() && value.fract() == 0.0 {
            Some(value as i64)
        } else {
            None
        }
    }
}
