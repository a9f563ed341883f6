//! Historical replay: one engine cycle per recorded timestamp.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::engine::{Account, CycleReport, DecisionEngine};
use crate::domain::error::QuantraderError;
use crate::domain::signal::SignalSnapshot;

/// Price and signal snapshot for one timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketStep {
    pub at: DateTime<Utc>,
    pub pricing: HashMap<String, f64>,
    pub signals: SignalSnapshot,
}

/// Ordered sequence of market steps. Each step's mutations are visible to
/// the next; there is no concurrency between steps.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalDataset {
    steps: Vec<MarketStep>,
}

impl HistoricalDataset {
    pub fn new(steps: Vec<MarketStep>) -> Result<Self, QuantraderError> {
        for pair in steps.windows(2) {
            if pair[1].at <= pair[0].at {
                return Err(QuantraderError::Dataset {
                    reason: format!(
                        "timeline not strictly increasing at {} -> {}",
                        pair[0].at, pair[1].at
                    ),
                });
            }
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[MarketStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub initial_cash: f64,
    pub cycles: Vec<CycleReport>,
}

impl BacktestResult {
    pub fn final_cash(&self) -> f64 {
        self.cycles
            .last()
            .map(|c| c.cash)
            .unwrap_or(self.initial_cash)
    }

    pub fn final_capital(&self) -> f64 {
        self.cycles
            .last()
            .map(|c| c.capital)
            .unwrap_or(self.initial_cash)
    }
}

/// Replay the dataset through the engine. Any engine error aborts the run
/// immediately; no partial result is produced.
pub fn run_backtest(
    dataset: &HistoricalDataset,
    engine: &DecisionEngine,
    initial_cash: f64,
) -> Result<BacktestResult, QuantraderError> {
    let mut account = Account::new(initial_cash, engine.config().possible_in_debt);
    let mut cycles = Vec::with_capacity(dataset.len());

    for step in dataset.steps() {
        let report = engine.run_cycle(&mut account, step.at, &step.pricing, &step.signals)?;
        cycles.push(report);
    }

    Ok(BacktestResult {
        initial_cash,
        cycles,
    })
}
