//! Predictor boundary: classified signals for the current timestamp.

use chrono::{DateTime, Utc};

use crate::domain::error::QuantraderError;
use crate::domain::signal::SignalSnapshot;

pub trait SignalPort {
    /// Timestamp of the newest fully collected candle, if any. The live
    /// loop only trades exactly one minute behind this.
    fn last_sync_on(&self) -> Result<Option<DateTime<Utc>>, QuantraderError>;

    /// Positive/negative asset sets for `now`.
    fn signals_at(&self, now: DateTime<Utc>) -> Result<SignalSnapshot, QuantraderError>;
}
