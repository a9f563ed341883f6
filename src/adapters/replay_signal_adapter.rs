//! Signal port backed by a loaded historical dataset.
//!
//! Used by the paper-trading session: the predictor's output was already
//! materialized into the dataset, so signals are served by timestamp lookup.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::backtest::HistoricalDataset;
use crate::domain::error::QuantraderError;
use crate::domain::signal::SignalSnapshot;
use crate::ports::signal_port::SignalPort;

pub struct ReplaySignalAdapter {
    by_timestamp: HashMap<DateTime<Utc>, SignalSnapshot>,
    last_at: Option<DateTime<Utc>>,
}

impl ReplaySignalAdapter {
    pub fn new(dataset: &HistoricalDataset) -> Self {
        let by_timestamp = dataset
            .steps()
            .iter()
            .map(|s| (s.at, s.signals.clone()))
            .collect();
        Self {
            by_timestamp,
            last_at: dataset.steps().last().map(|s| s.at),
        }
    }
}

impl SignalPort for ReplaySignalAdapter {
    fn last_sync_on(&self) -> Result<Option<DateTime<Utc>>, QuantraderError> {
        Ok(self.last_at)
    }

    /// Timestamps outside the dataset carry no signal.
    fn signals_at(&self, now: DateTime<Utc>) -> Result<SignalSnapshot, QuantraderError> {
        Ok(self.by_timestamp.get(&now).cloned().unwrap_or_default())
    }
}
