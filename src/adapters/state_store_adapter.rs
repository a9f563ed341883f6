//! File-backed trader state: per-asset entry times and the last trade time.
//!
//! Two small CSVs under the state directory; both survive restarts and are
//! cheap to rewrite whole on every cycle.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::domain::error::QuantraderError;
use crate::ports::state_port::StateStorePort;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LAST_ENTRY_AT_FILE: &str = "last_entry_at.csv";
const LAST_TRADE_FILE: &str = "last_trade_on.csv";

pub struct StateStoreAdapter {
    state_dir: PathBuf,
}

impl StateStoreAdapter {
    /// Creates the state directory if it does not exist yet.
    pub fn new(state_dir: PathBuf) -> Result<Self, QuantraderError> {
        fs::create_dir_all(&state_dir).map_err(|e| QuantraderError::StateStore {
            reason: format!("cannot create {}: {}", state_dir.display(), e),
        })?;
        Ok(Self { state_dir })
    }

    fn entry_path(&self) -> PathBuf {
        self.state_dir.join(LAST_ENTRY_AT_FILE)
    }

    fn trade_path(&self) -> PathBuf {
        self.state_dir.join(LAST_TRADE_FILE)
    }
}

impl StateStorePort for StateStoreAdapter {
    fn load_last_entry_at(&self) -> Result<HashMap<String, DateTime<Utc>>, QuantraderError> {
        let path = self.entry_path();
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let mut reader = open_reader(&path)?;
        let mut entries = HashMap::new();
        for result in reader.records() {
            let record = result.map_err(|e| read_error(&path, e))?;
            let asset = record.get(0).unwrap_or("").trim().to_string();
            let at = parse_timestamp(record.get(1).unwrap_or(""), &path)?;
            entries.insert(asset, at);
        }
        Ok(entries)
    }

    fn store_last_entry_at(
        &mut self,
        entries: &HashMap<String, DateTime<Utc>>,
    ) -> Result<(), QuantraderError> {
        let path = self.entry_path();
        let mut writer = csv::Writer::from_path(&path).map_err(|e| QuantraderError::StateStore {
            reason: format!("cannot create {}: {}", path.display(), e),
        })?;

        writer
            .write_record(["asset", "entry_at"])
            .map_err(|e| write_error(&path, e))?;
        // Stable order keeps the file diff-friendly.
        let mut assets: Vec<&String> = entries.keys().collect();
        assets.sort();
        for asset in assets {
            let at = entries[asset].format(TIMESTAMP_FORMAT).to_string();
            writer
                .write_record([asset.as_str(), at.as_str()])
                .map_err(|e| write_error(&path, e))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn last_trade_on(&self) -> Result<Option<DateTime<Utc>>, QuantraderError> {
        let path = self.trade_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| QuantraderError::StateStore {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        parse_timestamp(trimmed, &path).map(Some)
    }

    fn record_trade(&mut self, now: DateTime<Utc>) -> Result<(), QuantraderError> {
        let path = self.trade_path();
        fs::write(&path, now.format(TIMESTAMP_FORMAT).to_string()).map_err(|e| {
            QuantraderError::StateStore {
                reason: format!("cannot write {}: {}", path.display(), e),
            }
        })
    }
}

fn open_reader(path: &Path) -> Result<csv::Reader<fs::File>, QuantraderError> {
    csv::Reader::from_path(path).map_err(|e| QuantraderError::StateStore {
        reason: format!("cannot open {}: {}", path.display(), e),
    })
}

fn read_error(path: &Path, e: csv::Error) -> QuantraderError {
    QuantraderError::StateStore {
        reason: format!("CSV parse error in {}: {}", path.display(), e),
    }
}

fn write_error(path: &Path, e: csv::Error) -> QuantraderError {
    QuantraderError::StateStore {
        reason: format!("cannot write {}: {}", path.display(), e),
    }
}

fn parse_timestamp(raw: &str, path: &Path) -> Result<DateTime<Utc>, QuantraderError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| QuantraderError::StateStore {
            reason: format!("invalid timestamp {raw} in {}", path.display()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, min, 0).unwrap()
    }

    #[test]
    fn fresh_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = StateStoreAdapter::new(dir.path().join("state")).unwrap();
        assert!(store.load_last_entry_at().unwrap().is_empty());
        assert_eq!(store.last_trade_on().unwrap(), None);
    }

    #[test]
    fn entry_map_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStoreAdapter::new(dir.path().to_path_buf()).unwrap();

        let entries = HashMap::from([
            ("BTC/USD".to_string(), at(5)),
            ("ETH/USD".to_string(), at(7)),
        ]);
        store.store_last_entry_at(&entries).unwrap();

        let loaded = store.load_last_entry_at().unwrap();
        assert_eq!(loaded, entries);
    }

    #[test]
    fn store_overwrites_previous_map() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStoreAdapter::new(dir.path().to_path_buf()).unwrap();

        store
            .store_last_entry_at(&HashMap::from([("BTC/USD".to_string(), at(5))]))
            .unwrap();
        store
            .store_last_entry_at(&HashMap::from([("ETH/USD".to_string(), at(9))]))
            .unwrap();

        let loaded = store.load_last_entry_at().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["ETH/USD"], at(9));
    }

    #[test]
    fn trade_timestamp_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStoreAdapter::new(dir.path().to_path_buf()).unwrap();
        store.record_trade(at(42)).unwrap();
        assert_eq!(store.last_trade_on().unwrap(), Some(at(42)));
    }

    #[test]
    fn corrupt_timestamp_is_a_state_error() {
        let dir = TempDir::new().unwrap();
        let store = StateStoreAdapter::new(dir.path().to_path_buf()).unwrap();
        fs::write(dir.path().join(LAST_TRADE_FILE), "yesterday-ish").unwrap();
        assert!(matches!(
            store.last_trade_on().unwrap_err(),
            QuantraderError::StateStore { .. }
        ));
    }
}
