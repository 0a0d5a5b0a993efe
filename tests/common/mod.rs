#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use chrono::{NaiveDate, NaiveDateTime};
use parquet::arrow::ArrowWriter;
use taxi_pipeline::{FetchError, HttpFetcher, RawTripRecord};

pub fn at(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .expect("valid date")
        .and_hms_opt(hour, 0, 0)
        .expect("valid time")
}

/// A fully-populated trip; `trip_distance` doubles as a row id in assertions.
pub fn trip(id: u32, pickup: NaiveDateTime) -> RawTripRecord {
    RawTripRecord {
        vendor_id: Some(1 + i64::from(id % 2)),
        pickup: Some(pickup),
        dropoff: Some(pickup + chrono::Duration::minutes(12)),
        passenger_count: Some(1.0),
        trip_distance: Some(f64::from(id)),
        ratecode_id: Some(1),
        store_and_fwd_flag: Some("N".to_string()),
        pu_location_id: Some(161),
        do_location_id: Some(236),
        payment_type: Some(1),
        fare_amount: Some(12.0),
        extra: Some(1.0),
        mta_tax: Some(0.5),
        tip_amount: Some(2.0),
        tolls_amount: Some(0.0),
        improvement_surcharge: Some(1.0),
        total_amount: Some(19.0),
        congestion_surcharge: Some(2.5),
        airport_fee: Some(0.0),
    }
}

pub fn month_of_trips(first_id: u32, count: u32, year: i32, month: u32) -> Vec<RawTripRecord> {
    (0..count)
        .map(|offset| trip(first_id + offset, at(year, month, 1 + offset % 28, 10)))
        .collect()
}

pub fn ids(records: &[RawTripRecord]) -> Vec<u32> {
    records
        .iter()
        .map(|record| record.trip_distance.expect("id column") as u32)
        .collect()
}

fn micros(value: Option<NaiveDateTime>) -> Option<i64> {
    value.map(|ts| ts.and_utc().timestamp_micros())
}

/// Encodes trips the way TLC publishes them (lower-case `airport_fee`).
pub fn snapshot_bytes(records: &[RawTripRecord]) -> Vec<u8> {
    let ts_type = DataType::Timestamp(TimeUnit::Microsecond, None);
    let float = |name: &str, get: fn(&RawTripRecord) -> Option<f64>| -> (Field, ArrayRef) {
        (
            Field::new(name, DataType::Float64, true),
            Arc::new(Float64Array::from(records.iter().map(get).collect::<Vec<_>>())),
        )
    };
    let int = |name: &str, get: fn(&RawTripRecord) -> Option<i64>| -> (Field, ArrayRef) {
        (
            Field::new(name, DataType::Int64, true),
            Arc::new(Int64Array::from(records.iter().map(get).collect::<Vec<_>>())),
        )
    };

    let columns: Vec<(Field, ArrayRef)> = vec![
        int("VendorID", |r| r.vendor_id),
        (
            Field::new("tpep_pickup_datetime", ts_type.clone(), true),
            Arc::new(TimestampMicrosecondArray::from(
                records.iter().map(|r| micros(r.pickup)).collect::<Vec<_>>(),
            )) as ArrayRef,
        ),
        (
            Field::new("tpep_dropoff_datetime", ts_type, true),
            Arc::new(TimestampMicrosecondArray::from(
                records.iter().map(|r| micros(r.dropoff)).collect::<Vec<_>>(),
            )) as ArrayRef,
        ),
        float("passenger_count", |r| r.passenger_count),
        float("trip_distance", |r| r.trip_distance),
        int("RatecodeID", |r| r.ratecode_id),
        (
            Field::new("store_and_fwd_flag", DataType::Utf8, true),
            Arc::new(StringArray::from(
                records
                    .iter()
                    .map(|r| r.store_and_fwd_flag.clone())
                    .collect::<Vec<_>>(),
            )) as ArrayRef,
        ),
        int("PULocationID", |r| r.pu_location_id),
        int("DOLocationID", |r| r.do_location_id),
        int("payment_type", |r| r.payment_type),
        float("fare_amount", |r| r.fare_amount),
        float("extra", |r| r.extra),
        float("mta_tax", |r| r.mta_tax),
        float("tip_amount", |r| r.tip_amount),
        float("tolls_amount", |r| r.tolls_amount),
        float("improvement_surcharge", |r| r.improvement_surcharge),
        float("total_amount", |r| r.total_amount),
        float("congestion_surcharge", |r| r.congestion_surcharge),
        float("airport_fee", |r| r.airport_fee),
    ];

    let (fields, arrays): (Vec<Field>, Vec<ArrayRef>) = columns.into_iter().unzip();
    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays).expect("fixture batch should build");

    let mut writer =
        ArrowWriter::try_new(Vec::new(), schema, None).expect("parquet writer should open");
    writer.write(&batch).expect("fixture batch should encode");
    writer.into_inner().expect("parquet writer should close")
}

pub fn write_snapshot(path: &Path, records: &[RawTripRecord]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("fixture dir should be creatable");
    }
    fs::write(path, snapshot_bytes(records)).expect("fixture snapshot should be writable");
}

/// Serves canned bodies by URL; anything else is a 404.
#[derive(Default)]
pub struct MockFetcher {
    responses: HashMap<String, Vec<u8>>,
}

impl MockFetcher {
    pub fn with(mut self, url: &str, body: Vec<u8>) -> Self {
        self.responses.insert(url.to_string(), body);
        self
    }
}

impl HttpFetcher for MockFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
    }
}
