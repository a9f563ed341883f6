//! CSV loaders for the historical dataset and quantile bins.
//!
//! The dataset directory holds three files written by the (external)
//! dataset builder:
//!   pricing.csv      timestamp,asset,price
//!   predictions.csv  timestamp,asset,class     (0 bullish, 1 bearish)
//!   bins.csv         asset,boundary            (interior boundaries, one per row)

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::domain::backtest::{HistoricalDataset, MarketStep};
use crate::domain::error::QuantraderError;
use crate::domain::quantile::{BinsMap, QuantileBins};
use crate::domain::signal::SignalSnapshot;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct CsvDatasetAdapter {
    dataset_dir: PathBuf,
}

impl CsvDatasetAdapter {
    pub fn new(dataset_dir: PathBuf) -> Self {
        Self { dataset_dir }
    }

    /// Join pricing and predictions by timestamp into an ordered replay.
    /// Timestamps present only in predictions are ignored; timestamps with
    /// no prediction trade on an empty signal set.
    pub fn load_dataset(&self) -> Result<HistoricalDataset, QuantraderError> {
        let mut pricing: BTreeMap<DateTime<Utc>, HashMap<String, f64>> = BTreeMap::new();
        for record in read_records(&self.dataset_dir.join("pricing.csv"))? {
            let (at, asset, value) = record?;
            let price: f64 = parse_number(&value, "price")?;
            pricing.entry(at).or_default().insert(asset, price);
        }

        let mut predictions: BTreeMap<DateTime<Utc>, SignalSnapshot> = BTreeMap::new();
        for record in read_records(&self.dataset_dir.join("predictions.csv"))? {
            let (at, asset, value) = record?;
            let class: i64 = parse_number(&value, "class")?;
            predictions
                .entry(at)
                .or_default()
                .insert_prediction(&asset, class);
        }

        let steps = pricing
            .into_iter()
            .map(|(at, prices)| MarketStep {
                at,
                pricing: prices,
                signals: predictions.remove(&at).unwrap_or_default(),
            })
            .collect();

        HistoricalDataset::new(steps)
    }

    /// Per-asset interior boundaries, sorted ascending per asset.
    pub fn load_bins(&self) -> Result<BinsMap, QuantraderError> {
        let path = self.dataset_dir.join("bins.csv");
        let mut reader = open_reader(&path)?;

        let mut boundaries: HashMap<String, Vec<f64>> = HashMap::new();
        for result in reader.records() {
            let record = result.map_err(|e| csv_error(&path, e))?;
            let asset = field(&record, 0, "asset", &path)?;
            let boundary: f64 = parse_number(&field(&record, 1, "boundary", &path)?, "boundary")?;
            boundaries.entry(asset).or_default().push(boundary);
        }

        let bins = boundaries
            .into_iter()
            .map(|(asset, mut bounds)| {
                bounds.sort_by(|a, b| a.total_cmp(b));
                (asset, QuantileBins::new(bounds))
            })
            .collect();
        BinsMap::new(bins)
    }
}

type TimedRecord = Result<(DateTime<Utc>, String, String), QuantraderError>;

fn read_records(path: &Path) -> Result<Vec<TimedRecord>, QuantraderError> {
    let mut reader = open_reader(path)?;
    let mut rows = Vec::new();

    for result in reader.records() {
        let row = result
            .map_err(|e| csv_error(path, e))
            .and_then(|record| {
                let at = parse_timestamp(&field(&record, 0, "timestamp", path)?)?;
                let asset = field(&record, 1, "asset", path)?;
                let value = field(&record, 2, "value", path)?;
                Ok((at, asset, value))
            });
        rows.push(row);
    }
    Ok(rows)
}

fn open_reader(path: &Path) -> Result<csv::Reader<std::fs::File>, QuantraderError> {
    csv::Reader::from_path(path).map_err(|e| QuantraderError::Dataset {
        reason: format!("failed to open {}: {}", path.display(), e),
    })
}

fn csv_error(path: &Path, e: csv::Error) -> QuantraderError {
    QuantraderError::Dataset {
        reason: format!("CSV parse error in {}: {}", path.display(), e),
    }
}

fn field(
    record: &csv::StringRecord,
    idx: usize,
    name: &str,
    path: &Path,
) -> Result<String, QuantraderError> {
    record
        .get(idx)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| QuantraderError::Dataset {
            reason: format!("missing {name} column in {}", path.display()),
        })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, QuantraderError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| QuantraderError::Dataset {
            reason: format!("invalid timestamp {raw}, expected {TIMESTAMP_FORMAT}"),
        })
}

fn parse_number<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T, QuantraderError> {
    raw.parse().map_err(|_| QuantraderError::Dataset {
        reason: format!("invalid {name} value: {raw}"),
    })
}
