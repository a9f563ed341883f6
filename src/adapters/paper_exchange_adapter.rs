//! In-memory exchange simulation.
//!
//! Backs the `trade` command's dry-run mode and the live-loop tests: market
//! orders fill instantly at the posted quote, limit exits rest until a quote
//! crosses them, and balances follow the same commission arithmetic a real
//! venue would charge.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::error::QuantraderError;
use crate::domain::ledger::Commission;
use crate::domain::position::{Position, Side};
use crate::ports::exchange_port::{Balance, ExchangePort, OrderKind};

#[derive(Debug, Clone, PartialEq)]
struct RestingOrder {
    asset: String,
    side: Side,
    qty: f64,
    limit_price: f64,
}

pub struct PaperExchangeAdapter {
    cash: f64,
    commission: Commission,
    positions: Vec<Position>,
    resting: Vec<RestingOrder>,
    pricing: HashMap<String, f64>,
    min_qty: HashMap<String, f64>,
    clock: DateTime<Utc>,
}

impl PaperExchangeAdapter {
    pub fn new(initial_cash: f64, commission: Commission, clock: DateTime<Utc>) -> Self {
        Self {
            cash: initial_cash,
            commission,
            positions: Vec::new(),
            resting: Vec::new(),
            pricing: HashMap::new(),
            min_qty: HashMap::new(),
            clock,
        }
    }

    pub fn set_min_qty(&mut self, asset: &str, qty: f64) {
        self.min_qty.insert(asset.to_string(), qty);
    }

    pub fn set_clock(&mut self, now: DateTime<Utc>) {
        self.clock = now;
    }

    /// Post fresh quotes, then fill any resting limit exit they cross.
    pub fn set_pricing(&mut self, pricing: HashMap<String, f64>) {
        self.pricing = pricing;
        let resting = std::mem::take(&mut self.resting);
        for order in resting {
            match self.pricing.get(&order.asset).copied() {
                Some(price) if crossed(&order, price) => {
                    self.settle_exit(&order.asset, order.side, order.qty, order.limit_price);
                }
                _ => self.resting.push(order),
            }
        }
    }

    fn quote(&self, asset: &str) -> Option<f64> {
        self.pricing.get(asset).copied()
    }

    /// Remove the position and credit its liquidation value at `price`.
    fn settle_exit(&mut self, asset: &str, side: Side, qty: f64, price: f64) {
        let Some(idx) = self
            .positions
            .iter()
            .position(|p| p.asset == asset && p.side == side)
        else {
            return;
        };
        let position = self.positions.remove(idx);
        let qty = qty.min(position.qty);
        let gross = match side {
            Side::Long => price * qty,
            Side::Short => position.entry_price * qty - (price - position.entry_price) * qty,
        };
        self.cash += gross - price * qty * self.commission.exit_total();
    }
}

fn crossed(order: &RestingOrder, price: f64) -> bool {
    match order.side {
        // Long profit-taking sells at or above the limit.
        Side::Long => price >= order.limit_price,
        // Short profit-taking buys back at or below the limit.
        Side::Short => price <= order.limit_price,
    }
}

impl ExchangePort for PaperExchangeAdapter {
    fn fetch_positions(&self) -> Result<Vec<Position>, QuantraderError> {
        Ok(self.positions.clone())
    }

    fn fetch_balance(&self) -> Result<Balance, QuantraderError> {
        let mut total = self.cash;
        for position in &self.positions {
            let price = self
                .quote(&position.asset)
                .unwrap_or(position.entry_price);
            total += position.value(price);
        }
        Ok(Balance {
            free: self.cash,
            total,
        })
    }

    fn latest_pricing(&self) -> Result<HashMap<String, f64>, QuantraderError> {
        Ok(self.pricing.clone())
    }

    fn entry_order(
        &mut self,
        asset: &str,
        side: Side,
        qty: f64,
    ) -> Result<bool, QuantraderError> {
        let Some(price) = self.quote(asset) else {
            return Ok(false);
        };
        let notional = price * qty;
        self.cash -= notional + notional * self.commission.entry_total();

        let incoming = Position::new(asset, side, qty, price, self.clock);
        // Venues net same-side fills into a single position.
        if let Some(existing) = self
            .positions
            .iter_mut()
            .find(|p| p.asset == asset && p.side == side)
        {
            *existing = existing.merged_with(&incoming);
        } else {
            self.positions.push(incoming);
        }
        Ok(true)
    }

    fn exit_order(
        &mut self,
        asset: &str,
        side: Side,
        qty: f64,
        kind: OrderKind,
        limit_price: Option<f64>,
    ) -> Result<bool, QuantraderError> {
        match kind {
            OrderKind::Market => {
                let Some(price) = self.quote(asset) else {
                    return Ok(false);
                };
                if self
                    .positions
                    .iter()
                    .any(|p| p.asset == asset && p.side == side)
                {
                    self.settle_exit(asset, side, qty, price);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            OrderKind::Limit => {
                let Some(limit_price) = limit_price else {
                    return Err(QuantraderError::Exchange {
                        operation: "exit_order".into(),
                        reason: "limit order without a price".into(),
                    });
                };
                self.resting.push(RestingOrder {
                    asset: asset.to_string(),
                    side,
                    qty,
                    limit_price,
                });
                Ok(true)
            }
        }
    }

    fn cancel_orders(&mut self, asset: &str) -> Result<(), QuantraderError> {
        self.resting.retain(|o| o.asset != asset);
        Ok(())
    }

    fn open_order_count(&self, asset: &str) -> Result<usize, QuantraderError> {
        Ok(self.resting.iter().filter(|o| o.asset == asset).count())
    }

    fn min_order_qty(&self, asset: &str) -> f64 {
        self.min_qty.get(asset).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, min, 0).unwrap()
    }

    fn make_exchange(cash: f64) -> PaperExchangeAdapter {
        let mut ex = PaperExchangeAdapter::new(cash, Commission::ZERO, at(0));
        ex.set_pricing(HashMap::from([("BTC/USD".to_string(), 100.0)]));
        ex
    }

    #[test]
    fn market_entry_fills_at_quote() {
        let mut ex = make_exchange(1000.0);
        assert!(ex.entry_order("BTC/USD", Side::Long, 2.0).unwrap());

        let positions = ex.fetch_positions().unwrap();
        assert_eq!(positions.len(), 1);
        assert!((positions[0].entry_price - 100.0).abs() < f64::EPSILON);
        assert!((ex.fetch_balance().unwrap().free - 800.0).abs() < f64::EPSILON);
    }

    #[test]
    fn entry_without_quote_is_not_acked() {
        let mut ex = make_exchange(1000.0);
        assert!(!ex.entry_order("XRP/USD", Side::Long, 1.0).unwrap());
    }

    #[test]
    fn same_side_entries_are_netted() {
        let mut ex = make_exchange(1000.0);
        ex.entry_order("BTC/USD", Side::Long, 1.0).unwrap();
        ex.set_pricing(HashMap::from([("BTC/USD".to_string(), 120.0)]));
        ex.entry_order("BTC/USD", Side::Long, 1.0).unwrap();

        let positions = ex.fetch_positions().unwrap();
        assert_eq!(positions.len(), 1);
        assert!((positions[0].qty - 2.0).abs() < f64::EPSILON);
        assert!((positions[0].entry_price - 110.0).abs() < f64::EPSILON);
    }

    #[test]
    fn market_exit_credits_liquidation_value() {
        let mut ex = make_exchange(1000.0);
        ex.entry_order("BTC/USD", Side::Long, 2.0).unwrap();
        ex.set_pricing(HashMap::from([("BTC/USD".to_string(), 110.0)]));

        let acked = ex
            .exit_order("BTC/USD", Side::Long, 2.0, OrderKind::Market, None)
            .unwrap();
        assert!(acked);
        assert!(ex.fetch_positions().unwrap().is_empty());
        assert!((ex.fetch_balance().unwrap().free - 1020.0).abs() < f64::EPSILON);
    }

    #[test]
    fn market_exit_without_position_is_not_acked() {
        let mut ex = make_exchange(1000.0);
        let acked = ex
            .exit_order("BTC/USD", Side::Long, 1.0, OrderKind::Market, None)
            .unwrap();
        assert!(!acked);
    }

    #[test]
    fn limit_exit_rests_until_crossed() {
        let mut ex = make_exchange(1000.0);
        ex.entry_order("BTC/USD", Side::Long, 1.0).unwrap();
        ex.exit_order("BTC/USD", Side::Long, 1.0, OrderKind::Limit, Some(105.0))
            .unwrap();
        assert_eq!(ex.open_order_count("BTC/USD").unwrap(), 1);

        ex.set_pricing(HashMap::from([("BTC/USD".to_string(), 104.0)]));
        assert_eq!(ex.open_order_count("BTC/USD").unwrap(), 1);
        assert_eq!(ex.fetch_positions().unwrap().len(), 1);

        ex.set_pricing(HashMap::from([("BTC/USD".to_string(), 106.0)]));
        assert_eq!(ex.open_order_count("BTC/USD").unwrap(), 0);
        assert!(ex.fetch_positions().unwrap().is_empty());
        // Filled at the limit price, not the crossing quote.
        assert!((ex.fetch_balance().unwrap().free - 1005.0).abs() < f64::EPSILON);
    }

    #[test]
    fn short_limit_exit_fills_below() {
        let mut ex = make_exchange(1000.0);
        ex.entry_order("BTC/USD", Side::Short, 1.0).unwrap();
        ex.exit_order("BTC/USD", Side::Short, 1.0, OrderKind::Limit, Some(95.0))
            .unwrap();

        ex.set_pricing(HashMap::from([("BTC/USD".to_string(), 94.0)]));
        assert!(ex.fetch_positions().unwrap().is_empty());
        // Short entry held 100 escrowed; buy-back at 95 returns 105.
        assert!((ex.fetch_balance().unwrap().free - 1005.0).abs() < f64::EPSILON);
    }

    #[test]
    fn limit_order_requires_price() {
        let mut ex = make_exchange(1000.0);
        assert!(
            ex.exit_order("BTC/USD", Side::Long, 1.0, OrderKind::Limit, None)
                .is_err()
        );
    }

    #[test]
    fn cancel_clears_resting_orders() {
        let mut ex = make_exchange(1000.0);
        ex.entry_order("BTC/USD", Side::Long, 1.0).unwrap();
        ex.exit_order("BTC/USD", Side::Long, 1.0, OrderKind::Limit, Some(105.0))
            .unwrap();
        ex.cancel_orders("BTC/USD").unwrap();
        assert_eq!(ex.open_order_count("BTC/USD").unwrap(), 0);
    }

    #[test]
    fn commission_charged_on_both_legs() {
        let mut ex = PaperExchangeAdapter::new(1000.0, Commission::flat(0.01), at(0));
        ex.set_pricing(HashMap::from([("BTC/USD".to_string(), 100.0)]));
        ex.entry_order("BTC/USD", Side::Long, 1.0).unwrap();
        // 100 notional + 1 entry commission
        assert!((ex.fetch_balance().unwrap().free - 899.0).abs() < f64::EPSILON);

        ex.exit_order("BTC/USD", Side::Long, 1.0, OrderKind::Market, None)
            .unwrap();
        // back: 100 - 1 exit commission
        assert!((ex.fetch_balance().unwrap().free - 998.0).abs() < f64::EPSILON);
    }

    #[test]
    fn balance_total_marks_open_positions() {
        let mut ex = make_exchange(1000.0);
        ex.entry_order("BTC/USD", Side::Long, 2.0).unwrap();
        ex.set_pricing(HashMap::from([("BTC/USD".to_string(), 110.0)]));
        let balance = ex.fetch_balance().unwrap();
        assert!((balance.free - 800.0).abs() < f64::EPSILON);
        assert!((balance.total - 1020.0).abs() < f64::EPSILON);
    }
}
