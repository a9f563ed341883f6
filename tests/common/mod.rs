#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use quantrader::domain::backtest::{HistoricalDataset, MarketStep};
use quantrader::domain::config::{OrderCriterion, TradingConfig};
use quantrader::domain::error::QuantraderError;
use quantrader::domain::ledger::Commission;
use quantrader::domain::position::PositionMode;
use quantrader::domain::quantile::{BinsMap, QuantileBins};
use quantrader::domain::signal::SignalSnapshot;
use quantrader::ports::state_port::StateStorePort;
use std::collections::HashMap;

pub fn ts(min: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(min)
}

pub fn make_bins(assets: &[&str]) -> BinsMap {
    let bins = assets
        .iter()
        .map(|a| {
            (
                a.to_string(),
                QuantileBins::new(vec![-0.02, 0.0, 0.02]),
            )
        })
        .collect();
    BinsMap::new(bins).unwrap()
}

pub fn make_trading_config() -> TradingConfig {
    TradingConfig {
        position_mode: PositionMode::LongShort,
        entry_ratio: 100.0,
        commission: Commission::ZERO,
        min_holding_minutes: 1,
        max_holding_minutes: 10,
        compound_interest: false,
        possible_in_debt: false,
        achieved_with_commission: false,
        exit_if_achieved: true,
        max_n_updated: Some(0),
        exit_q_threshold: 3,
        achieve_ratio: 1.0,
        order_criterion: OrderCriterion::Capital,
        skip_affordability_check: false,
    }
}

pub struct StepBuilder {
    at: DateTime<Utc>,
    pricing: HashMap<String, f64>,
    signals: SignalSnapshot,
}

impl StepBuilder {
    pub fn at(min: i64) -> Self {
        Self {
            at: ts(min),
            pricing: HashMap::new(),
            signals: SignalSnapshot::default(),
        }
    }

    pub fn price(mut self, asset: &str, price: f64) -> Self {
        self.pricing.insert(asset.to_string(), price);
        self
    }

    pub fn positive(mut self, asset: &str) -> Self {
        self.signals.insert_prediction(asset, 0);
        self
    }

    pub fn negative(mut self, asset: &str) -> Self {
        self.signals.insert_prediction(asset, 1);
        self
    }

    pub fn build(self) -> MarketStep {
        MarketStep {
            at: self.at,
            pricing: self.pricing,
            signals: self.signals,
        }
    }
}

pub fn dataset(steps: Vec<MarketStep>) -> HistoricalDataset {
    HistoricalDataset::new(steps).unwrap()
}

/// In-memory state store for trader tests.
#[derive(Default)]
pub struct MemoryStateStore {
    pub last_entry_at: HashMap<String, DateTime<Utc>>,
    pub last_trade_on: Option<DateTime<Utc>>,
}

impl StateStorePort for MemoryStateStore {
    fn load_last_entry_at(&self) -> Result<HashMap<String, DateTime<Utc>>, QuantraderError> {
        Ok(self.last_entry_at.clone())
    }

    fn store_last_entry_at(
        &mut self,
        entries: &HashMap<String, DateTime<Utc>>,
    ) -> Result<(), QuantraderError> {
        self.last_entry_at = entries.clone();
        Ok(())
    }

    fn last_trade_on(&self) -> Result<Option<DateTime<Utc>>, QuantraderError> {
        Ok(self.last_trade_on)
    }

    fn record_trade(&mut self, now: DateTime<Utc>) -> Result<(), QuantraderError> {
        self.last_trade_on = Some(now);
        Ok(())
    }
}
