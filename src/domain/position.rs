//! Position tracking: sides, lifecycle fields, merge arithmetic.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

/// Which signal sets the engine is allowed to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    Long,
    Short,
    LongShort,
}

impl PositionMode {
    pub fn allows(&self, side: Side) -> bool {
        match (self, side) {
            (PositionMode::LongShort, _) => true,
            (PositionMode::Long, Side::Long) => true,
            (PositionMode::Short, Side::Short) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub asset: String,
    pub side: Side,
    pub qty: f64,
    pub entry_price: f64,
    /// Timestamp of the most recent fill, not the original open: a merge
    /// restarts the holding clock.
    pub entry_at: DateTime<Utc>,
    pub n_updated: u32,
    pub exited: bool,
}

impl Position {
    pub fn new(
        asset: impl Into<String>,
        side: Side,
        qty: f64,
        entry_price: f64,
        entry_at: DateTime<Utc>,
    ) -> Self {
        Self {
            asset: asset.into(),
            side,
            qty,
            entry_price,
            entry_at,
            n_updated: 0,
            exited: false,
        }
    }

    /// Mark-to-market value. Long is current notional; Short is the entry
    /// notional minus price appreciation (the liquidation value of the
    /// borrowed notional bought back at `price`).
    pub fn value(&self, price: f64) -> f64 {
        match self.side {
            Side::Long => price * self.qty,
            Side::Short => self.entry_price * self.qty - (price - self.entry_price) * self.qty,
        }
    }

    /// Whole minutes held as of `now`.
    pub fn held_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.entry_at).num_minutes()
    }

    /// Volume-weighted combination with a same-direction incoming fill.
    /// The result carries the incoming `entry_at` and an incremented
    /// update count.
    pub fn merged_with(&self, incoming: &Position) -> Position {
        let qty = self.qty + incoming.qty;
        let entry_price =
            (self.entry_price * self.qty + incoming.entry_price * incoming.qty) / qty;
        Position {
            asset: self.asset.clone(),
            side: self.side,
            qty,
            entry_price,
            entry_at: incoming.entry_at,
            n_updated: self.n_updated + 1,
            exited: false,
        }
    }

    pub fn update_limit_reached(&self, max_n_updated: Option<u32>) -> bool {
        matches!(max_n_updated, Some(cap) if self.n_updated >= cap)
    }
}
