//! Durable trader state: survives process restarts, resynchronized against
//! exchange truth at startup.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::error::QuantraderError;

pub trait StateStorePort {
    /// Per-asset timestamp of the most recent entry fill.
    fn load_last_entry_at(&self) -> Result<HashMap<String, DateTime<Utc>>, QuantraderError>;

    fn store_last_entry_at(
        &mut self,
        entries: &HashMap<String, DateTime<Utc>>,
    ) -> Result<(), QuantraderError>;

    /// When the loop last completed a trading cycle.
    fn last_trade_on(&self) -> Result<Option<DateTime<Utc>>, QuantraderError>;

    fn record_trade(&mut self, now: DateTime<Utc>) -> Result<(), QuantraderError>;
}
