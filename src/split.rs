//! Train/test partitioning of the feature table and the four split artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;

use crate::features::{FeatureRecord, FEATURE_COLUMNS, TARGET_COLUMN};
use crate::trip::{write_csv_atomic, DatasetError};

/// Direct summand of the target, kept out of the feature matrix.
pub const LEAKAGE_COLUMN: &str = "fare_amount";

pub const X_TRAIN_KEY: &str = "X_train.csv";
pub const X_TEST_KEY: &str = "X_test.csv";
pub const Y_TRAIN_KEY: &str = "y_train.csv";
pub const Y_TEST_KEY: &str = "y_test.csv";

/// Header plus string cells, the shape every persisted artifact shares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn from_features(records: &[FeatureRecord]) -> Self {
        Self {
            columns: FEATURE_COLUMNS.iter().map(|c| (*c).to_string()).collect(),
            rows: records.iter().map(FeatureRecord::cells).collect(),
        }
    }

    pub fn read_csv(path: &Path) -> Result<Self, DatasetError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;
        let columns = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Self { columns, rows })
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), DatasetError> {
        write_csv_atomic(path, |writer| {
            writer.write_record(&self.columns)?;
            for row in &self.rows {
                writer.write_record(row)?;
            }
            Ok(())
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    fn project(&self, columns: &[usize], rows: &[usize]) -> Self {
        Self {
            columns: columns.iter().map(|&c| self.columns[c].clone()).collect(),
            rows: rows
                .iter()
                .map(|&r| columns.iter().map(|&c| self.rows[r][c].clone()).collect())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitDataset {
    pub x_train: Table,
    pub x_test: Table,
    pub y_train: Table,
    pub y_test: Table,
}

impl SplitDataset {
    /// Artifacts paired with the fixed names downstream training loads.
    pub fn artifacts(&self) -> [(&'static str, &Table); 4] {
        [
            (X_TRAIN_KEY, &self.x_train),
            (X_TEST_KEY, &self.x_test),
            (Y_TRAIN_KEY, &self.y_train),
            (Y_TEST_KEY, &self.y_test),
        ]
    }

    pub fn write_all(&self, dir: &Path) -> Result<Vec<(&'static str, PathBuf)>, DatasetError> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(4);
        for (key, table) in self.artifacts() {
            let path = dir.join(key);
            table.write_csv(&path)?;
            written.push((key, path));
        }
        Ok(written)
    }
}

/// Randomly assigns `ceil(test_fraction * n)` rows to the test side and the
/// rest to training. `X` holds every column except the target and
/// `fare_amount`; `y` holds the target alone, row-aligned with `X`.
pub fn split(table: &Table, test_fraction: f64, seed: u64) -> Result<SplitDataset, DatasetError> {
    let target = table
        .column_index(TARGET_COLUMN)
        .ok_or_else(|| DatasetError::Schema {
            column: TARGET_COLUMN.to_string(),
            context: "feature table".to_string(),
        })?;

    let rows = table.len();
    let n_test = (test_fraction * rows as f64).ceil() as usize;
    if !(test_fraction > 0.0 && test_fraction < 1.0) || n_test == 0 || n_test >= rows {
        return Err(DatasetError::InvalidSplit {
            rows,
            test_fraction,
        });
    }

    let mut order: Vec<usize> = (0..rows).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let (test_rows, train_rows) = order.split_at(n_test);

    let feature_columns: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| name.as_str() != TARGET_COLUMN && name.as_str() != LEAKAGE_COLUMN)
        .map(|(index, _)| index)
        .collect();
    let target_columns = [target];

    let out = SplitDataset {
        x_train: table.project(&feature_columns, train_rows),
        x_test: table.project(&feature_columns, test_rows),
        y_train: table.project(&target_columns, train_rows),
        y_test: table.project(&target_columns, test_rows),
    };

    info!(
        component = "split",
        event = "split.finish",
        rows,
        train_rows = out.x_train.len(),
        test_rows = out.x_test.len(),
        feature_columns = feature_columns.len(),
        seed
    );

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn numbered(rows: usize) -> Table {
        Table {
            columns: vec![
                "id".to_string(),
                LEAKAGE_COLUMN.to_string(),
                TARGET_COLUMN.to_string(),
            ],
            rows: (0..rows)
                .map(|i| vec![i.to_string(), format!("{}", i * 2), format!("{}", i * 10)])
                .collect(),
        }
    }

    #[test]
    fn sizes_follow_ceil_of_test_fraction() {
        let out = split(&numbered(100), 0.2, 42).unwrap();
        assert_eq!(out.x_test.len(), 20);
        assert_eq!(out.x_train.len(), 80);

        let out = split(&numbered(11), 0.2, 42).unwrap();
        assert_eq!(out.x_test.len(), 3);
        assert_eq!(out.y_train.len(), 8);
    }

    #[test]
    fn x_drops_target_and_fare_amount_and_y_is_target_only() {
        let out = split(&numbered(10), 0.2, 42).unwrap();
        assert_eq!(out.x_train.columns, vec!["id".to_string()]);
        assert_eq!(out.y_train.columns, vec![TARGET_COLUMN.to_string()]);
    }

    #[test]
    fn rows_stay_aligned_and_partition_the_input() {
        let table = numbered(50);
        let out = split(&table, 0.2, 42).unwrap();

        for (x, y) in [(&out.x_train, &out.y_train), (&out.x_test, &out.y_test)] {
            for (xr, yr) in x.rows.iter().zip(&y.rows) {
                let id: usize = xr[0].parse().unwrap();
                assert_eq!(yr[0], (id * 10).to_string());
            }
        }

        let mut ids: Vec<usize> = out
            .x_train
            .rows
            .iter()
            .chain(&out.x_test.rows)
            .map(|row| row[0].parse().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn same_seed_same_partition() {
        let table = numbered(40);
        assert_eq!(split(&table, 0.2, 42).unwrap(), split(&table, 0.2, 42).unwrap());
        assert_ne!(
            split(&table, 0.2, 42).unwrap().x_test,
            split(&table, 0.2, 7).unwrap().x_test
        );
    }

    #[test]
    fn missing_target_is_a_schema_error() {
        let table = Table {
            columns: vec!["id".to_string(), LEAKAGE_COLUMN.to_string()],
            rows: vec![vec!["1".to_string(), "2".to_string()]; 5],
        };
        match split(&table, 0.2, 42).unwrap_err() {
            DatasetError::Schema { column, .. } => assert_eq!(column, TARGET_COLUMN),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn too_few_rows_cannot_be_split() {
        assert!(matches!(
            split(&numbered(1), 0.2, 42),
            Err(DatasetError::InvalidSplit { rows: 1, .. })
        ));
        assert!(matches!(
            split(&numbered(0), 0.2, 42),
            Err(DatasetError::InvalidSplit { rows: 0, .. })
        ));
    }

    #[test]
    fn artifacts_write_with_fixed_names_and_read_back() {
        let dir = tempdir().unwrap();
        let out = split(&numbered(10), 0.2, 42).unwrap();
        let written = out.write_all(dir.path()).unwrap();

        let keys: Vec<_> = written.iter().map(|(key, _)| *key).collect();
        assert_eq!(keys, vec![X_TRAIN_KEY, X_TEST_KEY, Y_TRAIN_KEY, Y_TEST_KEY]);

        let y_test = Table::read_csv(&dir.path().join(Y_TEST_KEY)).unwrap();
        assert_eq!(y_test, out.y_test);
    }
}
