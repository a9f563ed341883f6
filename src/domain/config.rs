//! Trading configuration: one immutable value object, validated once.

use crate::domain::error::QuantraderError;
use crate::domain::ledger::Commission;
use crate::domain::position::PositionMode;
use crate::ports::config_port::ConfigPort;

/// Base used for compounding order sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderCriterion {
    Cash,
    Capital,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradingConfig {
    pub position_mode: PositionMode,
    pub entry_ratio: f64,
    pub commission: Commission,
    pub min_holding_minutes: i64,
    pub max_holding_minutes: i64,
    pub compound_interest: bool,
    pub possible_in_debt: bool,
    pub achieved_with_commission: bool,
    pub exit_if_achieved: bool,
    /// Merge cap per position; `None` allows unlimited merges.
    pub max_n_updated: Option<u32>,
    pub exit_q_threshold: usize,
    pub achieve_ratio: f64,
    pub order_criterion: OrderCriterion,
    /// Live-mode workaround for exchange API rate limits: trust the capital
    /// criterion instead of querying free cash before every order.
    pub skip_affordability_check: bool,
}

impl TradingConfig {
    /// Read and validate the `[trading]` section.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantraderError> {
        let position_mode = parse_position_mode(config)?;
        let order_criterion = parse_order_criterion(config)?;

        let max_n_updated = match config.get_int("trading", "max_n_updated", -1) {
            n if n < 0 => None,
            n => Some(n as u32),
        };

        let exit_q_threshold = config.get_int("trading", "exit_q_threshold", -1);
        if exit_q_threshold < 0 {
            return Err(QuantraderError::ConfigMissing {
                section: "trading".into(),
                key: "exit_q_threshold".into(),
            });
        }

        let built = TradingConfig {
            position_mode,
            entry_ratio: config.get_double("trading", "entry_ratio", 0.05),
            commission: Commission {
                entry: config.get_double("trading", "commission_entry", 0.0015),
                exit: config.get_double("trading", "commission_exit", 0.0015),
                spread: config.get_double("trading", "commission_spread", 0.0),
            },
            min_holding_minutes: config.get_int("trading", "min_holding_minutes", 1),
            max_holding_minutes: config.get_int("trading", "max_holding_minutes", 10),
            compound_interest: config.get_bool("trading", "compound_interest", false),
            possible_in_debt: config.get_bool("trading", "possible_in_debt", false),
            achieved_with_commission: config.get_bool("trading", "achieved_with_commission", false),
            exit_if_achieved: config.get_bool("trading", "exit_if_achieved", true),
            max_n_updated,
            exit_q_threshold: exit_q_threshold as usize,
            achieve_ratio: config.get_double("trading", "achieve_ratio", 1.0),
            order_criterion,
            skip_affordability_check: config.get_bool(
                "trading",
                "skip_affordability_check",
                false,
            ),
        };

        built.validate()?;
        Ok(built)
    }

    /// Startup-fatal conflicts. Never called at cycle time.
    pub fn validate(&self) -> Result<(), QuantraderError> {
        if !(self.entry_ratio > 0.0 && self.entry_ratio.is_finite()) {
            return Err(invalid("entry_ratio", "must be a positive number"));
        }
        if self.commission.entry < 0.0 || self.commission.exit < 0.0 || self.commission.spread < 0.0
        {
            return Err(invalid("commission", "rates must be non-negative"));
        }
        if self.min_holding_minutes < 0 {
            return Err(invalid("min_holding_minutes", "must be non-negative"));
        }
        if self.max_holding_minutes <= self.min_holding_minutes {
            return Err(invalid(
                "max_holding_minutes",
                "must exceed min_holding_minutes",
            ));
        }
        if !(self.achieve_ratio > 0.0 && self.achieve_ratio.is_finite()) {
            return Err(invalid("achieve_ratio", "must be a positive number"));
        }
        if self.skip_affordability_check && self.order_criterion != OrderCriterion::Capital {
            return Err(invalid(
                "skip_affordability_check",
                "requires order_criterion = capital",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> QuantraderError {
    QuantraderError::ConfigInvalid {
        section: "trading".into(),
        key: key.into(),
        reason: reason.into(),
    }
}

fn parse_position_mode(config: &dyn ConfigPort) -> Result<PositionMode, QuantraderError> {
    let raw = config
        .get_string("trading", "position_side")
        .unwrap_or_else(|| "long".to_string());
    match raw.to_lowercase().as_str() {
        "long" => Ok(PositionMode::Long),
        "short" => Ok(PositionMode::Short),
        "longshort" => Ok(PositionMode::LongShort),
        other => Err(QuantraderError::ConfigInvalid {
            section: "trading".into(),
            key: "position_side".into(),
            reason: format!("expected long, short or longshort, got {other}"),
        }),
    }
}

fn parse_order_criterion(config: &dyn ConfigPort) -> Result<OrderCriterion, QuantraderError> {
    let raw = config
        .get_string("trading", "order_criterion")
        .unwrap_or_else(|| "capital".to_string());
    match raw.to_lowercase().as_str() {
        "cache" | "cash" => Ok(OrderCriterion::Cash),
        "capital" => Ok(OrderCriterion::Capital),
        other => Err(QuantraderError::ConfigInvalid {
            section: "trading".into(),
            key: "order_criterion".into(),
            reason: format!("expected cache or capital, got {other}"),
        }),
    }
}

#[cfg(test)]
pub(crate) fn sample_trading_config() -> TradingConfig {
    TradingConfig {
        position_mode: PositionMode::LongShort,
        entry_ratio: 0.05,
        commission: Commission::ZERO,
        min_holding_minutes: 1,
        max_holding_minutes: 10,
        compound_interest: false,
        possible_in_debt: false,
        achieved_with_commission: false,
        exit_if_achieved: true,
        max_n_updated: None,
        exit_q_threshold: 3,
        achieve_ratio: 1.0,
        order_criterion: OrderCriterion::Capital,
        skip_affordability_check: false,
    }
}
