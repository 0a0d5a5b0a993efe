//! Monthly snapshot periods and retrieval from the TLC file server.

use std::fmt;
use std::path::PathBuf;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{snapshot_file_name, PipelineConfig};
use crate::object_store::write_atomic;

/// One monthly snapshot, identified by calendar year and month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn file_name(self) -> String {
        snapshot_file_name(self.year, self.month)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// The two most recently completed months before `today`, most recent first.
///
/// `year_lag` shifts the reference year back before the computation.
pub fn target_periods(today: NaiveDate, year_lag: u32) -> [Period; 2] {
    let current = Period {
        year: today.year() - year_lag as i32,
        month: today.month(),
    };
    let latest = current.previous();
    [latest, latest.previous()]
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    Transport { url: String, message: String },
    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait HttpFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingFetcher {
    pub fn new(timeout_ms: u64) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| FetchError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestBlockingFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

/// Retrieves one period's raw batch and returns its local path.
pub trait SnapshotSource {
    fn fetch(&self, period: Period) -> Result<PathBuf, FetchError>;
}

pub struct HttpSnapshotSource {
    base_url: String,
    raw_data_dir: PathBuf,
    fetcher: Box<dyn HttpFetcher>,
}

impl HttpSnapshotSource {
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self, FetchError> {
        let fetcher = ReqwestBlockingFetcher::new(cfg.http_timeout_ms)?;
        Ok(Self::with_fetcher(cfg, Box::new(fetcher)))
    }

    pub fn with_fetcher(cfg: &PipelineConfig, fetcher: Box<dyn HttpFetcher>) -> Self {
        Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            raw_data_dir: cfg.raw_data_dir.clone(),
            fetcher,
        }
    }

    pub fn url_for(&self, period: Period) -> String {
        format!("{}/{}", self.base_url, period.file_name())
    }
}

impl SnapshotSource for HttpSnapshotSource {
    fn fetch(&self, period: Period) -> Result<PathBuf, FetchError> {
        let url = self.url_for(period);
        let local_path = self.raw_data_dir.join(period.file_name());
        debug!(
            component = "snapshot",
            event = "snapshot.fetch.start",
            period = %period,
            url = %url
        );

        let bytes = match self.fetcher.get_bytes(&url) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    component = "snapshot",
                    event = "snapshot.fetch.failed",
                    period = %period,
                    url = %url,
                    error = %err
                );
                return Err(err);
            }
        };

        write_atomic(&local_path, &bytes)?;
        info!(
            component = "snapshot",
            event = "snapshot.fetch.downloaded",
            period = %period,
            path = %local_path.display(),
            bytes = bytes.len()
        );

        Ok(local_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    #[derive(Default)]
    struct MockFetcher {
        responses: HashMap<String, Vec<u8>>,
    }

    impl MockFetcher {
        fn with(mut self, url: &str, body: &[u8]) -> Self {
            self.responses.insert(url.to_string(), body.to_vec());
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

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn march_targets_february_then_january() {
        assert_eq!(
            target_periods(date(2024, 3, 15), 0),
            [Period::new(2024, 2).unwrap(), Period::new(2024, 1).unwrap()]
        );
    }

    #[test]
    fn january_rolls_back_across_the_year_boundary() {
        assert_eq!(
            target_periods(date(2024, 1, 2), 0),
            [Period::new(2023, 12).unwrap(), Period::new(2023, 11).unwrap()]
        );
    }

    #[test]
    fn february_targets_january_then_december() {
        assert_eq!(
            target_periods(date(2024, 2, 29), 0),
            [Period::new(2024, 1).unwrap(), Period::new(2023, 12).unwrap()]
        );
    }

    #[test]
    fn year_lag_shifts_reference_year() {
        assert_eq!(
            target_periods(date(2026, 10, 19), 1),
            [Period::new(2025, 9).unwrap(), Period::new(2025, 8).unwrap()]
        );
    }

    #[test]
    fn period_rejects_invalid_month_and_formats_padded() {
        assert!(Period::new(2024, 0).is_none());
        assert!(Period::new(2024, 13).is_none());
        let period = Period::new(2024, 7).unwrap();
        assert_eq!(period.to_string(), "2024-07");
        assert_eq!(period.file_name(), "yellow_tripdata_2024-07.parquet");
    }

    #[test]
    fn fetch_writes_snapshot_into_raw_dir() {
        let temp = tempdir().unwrap();
        let cfg = PipelineConfig {
            base_url: "https://files.test/trip-data/".to_string(),
            raw_data_dir: temp.path().join("raw"),
            ..PipelineConfig::default()
        };
        let fetcher = MockFetcher::default().with(
            "https://files.test/trip-data/yellow_tripdata_2024-05.parquet",
            b"PAR1",
        );
        let source = HttpSnapshotSource::with_fetcher(&cfg, Box::new(fetcher));

        let path = source.fetch(Period::new(2024, 5).unwrap()).unwrap();
        assert_eq!(path, temp.path().join("raw/yellow_tripdata_2024-05.parquet"));
        assert_eq!(fs::read(path).unwrap(), b"PAR1");
    }

    #[test]
    fn fetch_surfaces_non_success_status() {
        let temp = tempdir().unwrap();
        let cfg = PipelineConfig {
            raw_data_dir: temp.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let source = HttpSnapshotSource::with_fetcher(&cfg, Box::new(MockFetcher::default()));

        let err = source.fetch(Period::new(2024, 5).unwrap()).unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
        assert!(!temp.path().join("yellow_tripdata_2024-05.parquet").exists());
    }
}
