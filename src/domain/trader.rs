//! Live trading loop: the decision engine driven by exchange truth.
//!
//! Internal state is rebuilt from the exchange every cycle; the only thing
//! persisted locally is the per-asset entry timestamp (the venue does not
//! report when a position was opened across restarts) and the last trade
//! time. A fatal error propagates out of `run` and ends the process; the
//! supervisor restarts it and the next cycle resynchronizes.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};

use crate::domain::book::PositionBook;
use crate::domain::engine::{DecisionEngine, EntryPlan, SkipReason};
use crate::domain::error::QuantraderError;
use crate::domain::ledger::Ledger;
use crate::domain::position::{Position, Side};
use crate::ports::exchange_port::{ExchangePort, OrderKind};
use crate::ports::signal_port::SignalPort;
use crate::ports::state_port::StateStorePort;

/// Minimum delay between consecutive calls against the venue.
const API_REQUEST_DELAY: Duration = Duration::from_millis(200);
/// Idle poll interval while waiting for the next tradable minute.
const IDLE_POLL_DELAY: Duration = Duration::from_millis(200);

pub struct Trader<E, S, T>
where
    E: ExchangePort,
    S: SignalPort,
    T: StateStorePort,
{
    engine: DecisionEngine,
    exchange: E,
    signals: S,
    store: T,
    last_entry_at: HashMap<String, DateTime<Utc>>,
}

impl<E, S, T> Trader<E, S, T>
where
    E: ExchangePort,
    S: SignalPort,
    T: StateStorePort,
{
    pub fn new(
        engine: DecisionEngine,
        exchange: E,
        signals: S,
        store: T,
    ) -> Result<Self, QuantraderError> {
        // Live merging is not supported: a repeat same-side signal refreshes
        // the holding clock instead of ordering again.
        if engine.config().max_n_updated != Some(0) {
            return Err(QuantraderError::ConfigInvalid {
                section: "trading".into(),
                key: "max_n_updated".into(),
                reason: "live trading requires max_n_updated = 0".into(),
            });
        }

        let mut last_entry_at = store.load_last_entry_at()?;
        // Exchange truth wins where it is newer than the persisted map.
        for position in exchange.fetch_positions()? {
            last_entry_at
                .entry(position.asset.clone())
                .and_modify(|at| {
                    if position.entry_at > *at {
                        *at = position.entry_at;
                    }
                })
                .or_insert(position.entry_at);
        }

        Ok(Self {
            engine,
            exchange,
            signals,
            store,
            last_entry_at,
        })
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    /// Concrete-adapter access for sessions that drive the venue state
    /// themselves (the paper exchange).
    pub fn exchange_mut(&mut self) -> &mut E {
        &mut self.exchange
    }

    pub fn last_entry_at(&self) -> &HashMap<String, DateTime<Utc>> {
        &self.last_entry_at
    }

    /// Re-arm an achievement limit order for every resting position that has
    /// none (a restart may have lost them mid-flight).
    pub fn initialize_order_books(&mut self) -> Result<(), QuantraderError> {
        if !self.engine.config().exit_if_achieved {
            return Ok(());
        }
        for position in self.exchange.fetch_positions()? {
            if self.exchange.open_order_count(&position.asset)? >= 1 {
                continue;
            }
            self.place_achievement_order(&position)?;
        }
        eprintln!("[O] Info: initialized order books");
        Ok(())
    }

    /// The loop trades exactly one minute behind the collector, at most once
    /// per minute.
    pub fn is_executable(
        &self,
        last_sync_on: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, QuantraderError> {
        let Some(sync) = last_sync_on else {
            return Ok(false);
        };
        if (now - sync).num_minutes() != 1 {
            return Ok(false);
        }
        match self.store.last_trade_on()? {
            None => Ok(true),
            Some(last) => Ok((now - last).num_minutes() >= 1),
        }
    }

    /// One full trading cycle at `now`. Callers gate with `is_executable`.
    pub fn trade_once(&mut self, now: DateTime<Utc>) -> Result<(), QuantraderError> {
        let signals = self.signals.signals_at(now)?;
        let pricing = self.exchange.latest_pricing()?;
        let mut book = self.rebuild_book(self.exchange.fetch_positions()?);

        // Exit pass: every decision is a required step; failures abort.
        let decisions = self.engine.evaluate_exits(&book, &pricing, &signals, now)?;
        for decision in &decisions {
            self.exit_position(&decision.position)?;
            eprintln!(
                "[-] Exit: {} {} qty {:.6}, {}",
                decision.position.asset,
                decision.position.side.as_str(),
                decision.position.qty,
                decision.reason.as_str(),
            );
            book.mark_exited(&decision.position.asset, decision.position.side);
        }
        book.compact();

        // Budget from venue balances; free cash backs the affordability
        // check when it is not configured away.
        let balance = self.exchange.fetch_balance()?;
        let budget = self.engine.order_budget(balance.free, balance.total);
        let ledger = Ledger::new(balance.free, self.engine.config().possible_in_debt);

        eprintln!(
            "[_] Capital: {:.2} | Holds: long({}), short({}) | Signals: pos({}), neg({})",
            balance.total,
            book.count_side(Side::Long),
            book.count_side(Side::Short),
            signals.positive().count(),
            signals.negative().count(),
        );

        // Entry pass.
        let mut filled: Vec<String> = Vec::new();
        for (asset, side) in self.engine.entry_candidates(&signals) {
            let plan =
                self.engine
                    .plan_entry(&book, &ledger, &asset, side, budget, &pricing, now)?;
            match plan {
                EntryPlan::Open { position, .. } => {
                    if position.qty < self.exchange.min_order_qty(&asset) {
                        continue;
                    }
                    if self.exchange.entry_order(&asset, side, position.qty)? {
                        self.last_entry_at.insert(asset.clone(), now);
                        filled.push(asset.clone());
                        eprintln!(
                            "[+] Entry: {} {} qty {:.6} @ {:.2}",
                            asset,
                            side.as_str(),
                            position.qty,
                            position.entry_price,
                        );
                    }
                }
                // A repeat same-side signal refreshes the holding clock.
                EntryPlan::Merge { .. } | EntryPlan::Skip(SkipReason::UpdateLimitReached) => {
                    self.last_entry_at.insert(asset.clone(), now);
                }
                EntryPlan::Skip(_) => {}
            }
        }

        // Resting profit-taking orders for this cycle's fills, at the
        // venue-reported entry price.
        if self.engine.config().exit_if_achieved && !filled.is_empty() {
            thread::sleep(API_REQUEST_DELAY);
            for position in self.exchange.fetch_positions()? {
                if !filled.contains(&position.asset) {
                    continue;
                }
                self.place_achievement_order(&position)?;
            }
        }

        self.store.record_trade(now)?;
        self.store.store_last_entry_at(&self.last_entry_at)?;
        Ok(())
    }

    /// Poll forever; fatal errors propagate to the caller, which logs and
    /// exits so supervision can restart from exchange truth.
    pub fn run(&mut self) -> Result<(), QuantraderError> {
        eprintln!("[O] Start: trader loop");
        self.initialize_order_books()?;

        loop {
            let now = floor_minute(Utc::now());
            let last_sync_on = self.signals.last_sync_on()?;
            if self.is_executable(last_sync_on, now)? {
                self.trade_once(now)?;
            } else {
                thread::sleep(IDLE_POLL_DELAY);
            }
        }
    }

    /// Holding durations come from the persisted map, not the venue: the
    /// venue forgets fill times across position netting.
    fn rebuild_book(&self, positions: Vec<Position>) -> PositionBook {
        let positions = positions
            .into_iter()
            .map(|mut p| {
                if let Some(at) = self.last_entry_at.get(&p.asset) {
                    p.entry_at = *at;
                }
                p
            })
            .collect();
        PositionBook::from_positions(positions)
    }

    fn exit_position(&mut self, position: &Position) -> Result<(), QuantraderError> {
        self.exchange.cancel_orders(&position.asset)?;
        thread::sleep(API_REQUEST_DELAY);
        let acked = self.exchange.exit_order(
            &position.asset,
            position.side,
            position.qty,
            OrderKind::Market,
            None,
        )?;
        if !acked {
            return Err(QuantraderError::Exchange {
                operation: "exit_order".into(),
                reason: format!("no acknowledgment for {}", position.asset),
            });
        }
        Ok(())
    }

    fn place_achievement_order(&mut self, position: &Position) -> Result<(), QuantraderError> {
        if !(position.entry_price > 0.0) {
            return Err(QuantraderError::InvariantViolation {
                reason: format!(
                    "exchange reported entry price {} for {}",
                    position.entry_price, position.asset
                ),
            });
        }
        let price = self.engine.price_to_achieve(position)?;
        self.exchange.exit_order(
            &position.asset,
            position.side,
            position.qty,
            OrderKind::Limit,
            Some(price),
        )?;
        Ok(())
    }
}

/// Timestamps are compared at whole-minute resolution throughout the loop.
pub fn floor_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}
