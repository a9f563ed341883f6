//! Exchange connectivity port trait (live trading boundary).
//!
//! Implementations own authentication, rate limiting, and retry policy. A
//! `false` acknowledgment means "this order did not happen"; the trader
//! leaves its view of state matching the last exchange truth and moves on
//! (or aborts, when the operation was a required step of an exit).

use std::collections::HashMap;

use crate::domain::error::QuantraderError;
use crate::domain::position::{Position, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Market,
    Limit,
}

/// Cash balances as the venue reports them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balance {
    pub free: f64,
    pub total: f64,
}

pub trait ExchangePort {
    /// Open positions as the venue reports them. `entry_at` carries the
    /// venue's fill time where available; the trader overlays its own
    /// persisted entry times regardless.
    fn fetch_positions(&self) -> Result<Vec<Position>, QuantraderError>;

    fn fetch_balance(&self) -> Result<Balance, QuantraderError>;

    /// Latest quote per tradable asset.
    fn latest_pricing(&self) -> Result<HashMap<String, f64>, QuantraderError>;

    /// Market entry. Returns whether the venue acknowledged the order.
    fn entry_order(&mut self, asset: &str, side: Side, qty: f64)
    -> Result<bool, QuantraderError>;

    /// Market or limit exit for an open position.
    fn exit_order(
        &mut self,
        asset: &str,
        side: Side,
        qty: f64,
        kind: OrderKind,
        limit_price: Option<f64>,
    ) -> Result<bool, QuantraderError>;

    /// Cancel every resting order for the asset.
    fn cancel_orders(&mut self, asset: &str) -> Result<(), QuantraderError>;

    fn open_order_count(&self, asset: &str) -> Result<usize, QuantraderError>;

    /// Venue minimum order quantity for the asset (0.0 when unconstrained).
    fn min_order_qty(&self, asset: &str) -> f64;
}
