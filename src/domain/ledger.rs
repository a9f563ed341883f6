//! Cash accounting: commissions, affordability, mark-to-market capital.

use std::collections::HashMap;

use crate::domain::book::PositionBook;
use crate::domain::position::Position;

/// Commission rates, split by leg. Backtests that model a single flat rate
/// use [`Commission::flat`]; live venues quote entry/exit taker fees plus a
/// spread allowance separately.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Commission {
    pub entry: f64,
    pub exit: f64,
    pub spread: f64,
}

impl Commission {
    pub fn flat(rate: f64) -> Self {
        Self {
            entry: rate,
            exit: rate,
            spread: 0.0,
        }
    }

    pub const ZERO: Commission = Commission {
        entry: 0.0,
        exit: 0.0,
        spread: 0.0,
    };

    /// Rate applied to the entry notional of an order.
    pub fn entry_total(&self) -> f64 {
        self.entry + self.spread
    }

    /// Rate applied to the exit notional of an order.
    pub fn exit_total(&self) -> f64 {
        self.exit + self.spread
    }
}

/// Available cash plus the debt policy. Positions live in [`PositionBook`];
/// the two together are the whole mutable trading state.
#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    cash: f64,
    possible_in_debt: bool,
}

impl Ledger {
    pub fn new(initial_cash: f64, possible_in_debt: bool) -> Self {
        Self {
            cash: initial_cash,
            possible_in_debt,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Entry notional plus entry-side commission.
    pub fn cost_to_open(&self, entry_price: f64, qty: f64, commission: &Commission) -> f64 {
        let notional = entry_price * qty;
        notional + notional * commission.entry_total()
    }

    /// Unconditionally true when debt is permitted; otherwise the order must
    /// leave cash non-negative.
    pub fn is_affordable(&self, cost: f64) -> bool {
        self.possible_in_debt || self.cash - cost >= 0.0
    }

    pub fn pay(&mut self, cost: f64) {
        self.cash -= cost;
    }

    pub fn deposit(&mut self, profit: f64) {
        self.cash += profit;
    }

    /// Cash plus mark-to-market value of every live position. Assets with no
    /// quote in `pricing` are marked at their entry price.
    pub fn capital(&self, book: &PositionBook, pricing: &HashMap<String, f64>) -> f64 {
        let mut capital = self.cash;
        for position in book.iter() {
            let price = pricing
                .get(&position.asset)
                .copied()
                .unwrap_or(position.entry_price);
            capital += position.value(price);
        }
        capital
    }

    /// Liquidation value deposited when `position` exits at `current_price`:
    /// the side's mark-to-market value minus exit commission on the current
    /// notional.
    pub fn profit_on_exit(
        &self,
        position: &Position,
        current_price: f64,
        commission: &Commission,
    ) -> f64 {
        let gross = position.value(current_price);
        let exit_commission = current_price * position.qty * commission.exit_total();
        gross - exit_commission
    }
}
