//! The per-step decision cycle shared by the backtester and the live trader.
//!
//! One cycle is: exit evaluation over a stable book snapshot, batch
//! application of exits, order-budget computation, then entry planning and
//! application. Evaluation and planning are pure; only the `apply_*` steps
//! touch the ledger and the book.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::book::PositionBook;
use crate::domain::config::{OrderCriterion, TradingConfig};
use crate::domain::error::QuantraderError;
use crate::domain::ledger::Ledger;
use crate::domain::position::{Position, Side};
use crate::domain::quantile::BinsMap;
use crate::domain::signal::SignalSnapshot;

/// The whole mutable trading state, threaded through each cycle by the
/// runner that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub ledger: Ledger,
    pub book: PositionBook,
}

impl Account {
    pub fn new(initial_cash: f64, possible_in_debt: bool) -> Self {
        Self {
            ledger: Ledger::new(initial_cash, possible_in_debt),
            book: PositionBook::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    MaxHoldingMinutes,
    OppositeSignal,
    Achieved,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::MaxHoldingMinutes => "max_holding_minutes",
            ExitReason::OppositeSignal => "opposite_signal",
            ExitReason::Achieved => "achieved",
        }
    }
}

/// Output of the pure exit pass; applied as a batch afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub position: Position,
    pub reason: ExitReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitRecord {
    pub asset: String,
    pub side: Side,
    pub reason: ExitReason,
    /// Liquidation value deposited back into the ledger.
    pub profit: f64,
    /// Profit net of the entry notional (entry commission excluded; it was
    /// paid from cash at entry time).
    pub pnl: f64,
}

/// Why an entry became a no-op. Normal market conditions, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ZeroBudget,
    OppositePosition,
    UpdateLimitReached,
    NotAffordable,
    NoQuote,
}

/// Pure entry decision, committed by `apply_entries` or executed against an
/// exchange by the live runner.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryPlan {
    Open { position: Position, cost: f64 },
    Merge { incoming: Position, cost: f64 },
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// A fresh position was opened on a signal.
    Signal,
    /// An existing position absorbed the order via merge.
    Updated,
    Skipped(SkipReason),
}

impl EntryOutcome {
    /// Reporting key; skips are an implicit no-op in reports.
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            EntryOutcome::Signal => Some("signal"),
            EntryOutcome::Updated => Some("updated"),
            EntryOutcome::Skipped(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryRecord {
    pub asset: String,
    pub side: Side,
    pub outcome: EntryOutcome,
}

/// Everything a collaborator needs to observe one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub at: DateTime<Utc>,
    pub cash: f64,
    pub capital: f64,
    pub positions: Vec<Position>,
    pub exits: Vec<ExitRecord>,
    pub entries: Vec<EntryRecord>,
}

pub struct DecisionEngine {
    config: TradingConfig,
    bins: BinsMap,
}

impl DecisionEngine {
    pub fn new(config: TradingConfig, bins: BinsMap) -> Result<Self, QuantraderError> {
        config.validate()?;
        if config.exit_q_threshold >= bins.n_bins() {
            return Err(QuantraderError::ConfigInvalid {
                section: "trading".into(),
                key: "exit_q_threshold".into(),
                reason: format!(
                    "threshold {} out of range for {} buckets",
                    config.exit_q_threshold,
                    bins.n_bins()
                ),
            });
        }
        Ok(Self { config, bins })
    }

    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    /// Exit pass. The minimum-holding grace short-circuits every other
    /// trigger; past it, precedence is max-holding, opposite signal,
    /// achievement.
    pub fn evaluate_exits(
        &self,
        book: &PositionBook,
        pricing: &HashMap<String, f64>,
        signals: &SignalSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExitDecision>, QuantraderError> {
        let mut decisions = Vec::new();

        for position in book.iter() {
            let held = position.held_minutes(now);

            if held <= self.config.min_holding_minutes {
                continue;
            }

            if held >= self.config.max_holding_minutes {
                decisions.push(ExitDecision {
                    position: position.clone(),
                    reason: ExitReason::MaxHoldingMinutes,
                });
                continue;
            }

            if signals.opposes(&position.asset, position.side) {
                decisions.push(ExitDecision {
                    position: position.clone(),
                    reason: ExitReason::OppositeSignal,
                });
                continue;
            }

            if self.config.exit_if_achieved {
                let price = quote(pricing, &position.asset)?;
                if self.check_if_achieved(position, price)? {
                    decisions.push(ExitDecision {
                        position: position.clone(),
                        reason: ExitReason::Achieved,
                    });
                }
            }
        }

        Ok(decisions)
    }

    /// Settle each decision into the ledger, then compact the book once.
    pub fn apply_exits(
        &self,
        account: &mut Account,
        decisions: &[ExitDecision],
        pricing: &HashMap<String, f64>,
    ) -> Result<Vec<ExitRecord>, QuantraderError> {
        let mut records = Vec::with_capacity(decisions.len());

        for decision in decisions {
            let position = &decision.position;
            let price = quote(pricing, &position.asset)?;
            let profit = account
                .ledger
                .profit_on_exit(position, price, &self.config.commission);
            account.ledger.deposit(profit);
            account.book.mark_exited(&position.asset, position.side);
            records.push(ExitRecord {
                asset: position.asset.clone(),
                side: position.side,
                reason: decision.reason,
                profit,
                pnl: profit - position.entry_price * position.qty,
            });
        }

        account.book.compact();
        Ok(records)
    }

    /// Currency to commit per order this cycle. Without compounding this is
    /// the literal `entry_ratio` value; with compounding it is a fraction of
    /// cash or capital per the configured criterion, clamped to zero unless
    /// finite and positive.
    pub fn order_budget(&self, cash: f64, capital: f64) -> f64 {
        if !self.config.compound_interest {
            return self.config.entry_ratio;
        }
        let base = match self.config.order_criterion {
            OrderCriterion::Cash => {
                if cash > 0.0 {
                    cash
                } else {
                    return 0.0;
                }
            }
            OrderCriterion::Capital => capital,
        };
        positive_or_zero(base * self.config.entry_ratio)
    }

    /// Assets to attempt entries on, gated by the configured side mode.
    pub fn entry_candidates(&self, signals: &SignalSnapshot) -> Vec<(String, Side)> {
        let mut candidates = Vec::new();
        for side in [Side::Long, Side::Short] {
            if self.config.position_mode.allows(side) {
                for asset in signals.entry_candidates(side) {
                    candidates.push((asset, side));
                }
            }
        }
        candidates
    }

    /// Pure entry decision for one candidate against the current state.
    pub fn plan_entry(
        &self,
        book: &PositionBook,
        ledger: &Ledger,
        asset: &str,
        side: Side,
        budget: f64,
        pricing: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Result<EntryPlan, QuantraderError> {
        if budget <= 0.0 {
            return Ok(EntryPlan::Skip(SkipReason::ZeroBudget));
        }
        if book.opposite_exists(asset, side) {
            return Ok(EntryPlan::Skip(SkipReason::OppositePosition));
        }
        let Some(price) = pricing.get(asset).copied() else {
            return Ok(EntryPlan::Skip(SkipReason::NoQuote));
        };
        if !(price > 0.0 && price.is_finite()) {
            return Err(QuantraderError::InvariantViolation {
                reason: format!("non-positive quote {price} for {asset}"),
            });
        }

        let qty = budget / price;
        let incoming = Position::new(asset, side, qty, price, now);
        let cost = ledger.cost_to_open(price, qty, &self.config.commission);

        if let Some(existing) = book.find(asset, side) {
            if existing.update_limit_reached(self.config.max_n_updated) {
                return Ok(EntryPlan::Skip(SkipReason::UpdateLimitReached));
            }
            if self.affordable(ledger, cost) {
                Ok(EntryPlan::Merge { incoming, cost })
            } else {
                Ok(EntryPlan::Skip(SkipReason::NotAffordable))
            }
        } else if self.affordable(ledger, cost) {
            Ok(EntryPlan::Open {
                position: incoming,
                cost,
            })
        } else {
            Ok(EntryPlan::Skip(SkipReason::NotAffordable))
        }
    }

    /// Commit entry plans sequentially; each order sees the cash left by the
    /// previous one.
    pub fn apply_entries(
        &self,
        account: &mut Account,
        candidates: &[(String, Side)],
        budget: f64,
        pricing: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<EntryRecord>, QuantraderError> {
        let mut records = Vec::with_capacity(candidates.len());

        for (asset, side) in candidates {
            let plan = self.plan_entry(
                &account.book,
                &account.ledger,
                asset,
                *side,
                budget,
                pricing,
                now,
            )?;
            let outcome = match plan {
                EntryPlan::Open { position, cost } => {
                    account.ledger.pay(cost);
                    account.book.open(position);
                    EntryOutcome::Signal
                }
                EntryPlan::Merge { incoming, cost } => {
                    account.ledger.pay(cost);
                    account.book.merge(&incoming);
                    EntryOutcome::Updated
                }
                EntryPlan::Skip(reason) => EntryOutcome::Skipped(reason),
            };
            records.push(EntryRecord {
                asset: asset.clone(),
                side: *side,
                outcome,
            });
        }

        Ok(records)
    }

    /// Achievement: classify the commission-adjusted trade return and compare
    /// the bucket against the threshold (mirrored for Short). The Short
    /// adjustment is the Long term negated, the backtester convention.
    pub fn check_if_achieved(
        &self,
        position: &Position,
        current_price: f64,
    ) -> Result<bool, QuantraderError> {
        let mut diff_price = current_price - position.entry_price;

        if self.config.achieved_with_commission {
            let adjustment = position.entry_price * self.config.commission.entry_total()
                + current_price * self.config.commission.exit_total();
            diff_price -= match position.side {
                Side::Long => adjustment,
                Side::Short => -adjustment,
            };
        }

        let trade_return = if diff_price != 0.0 {
            diff_price / position.entry_price
        } else {
            0.0
        };

        let bucket = self.bins.get(&position.asset)?.classify(trade_return)?;

        Ok(match position.side {
            Side::Long => bucket >= self.config.exit_q_threshold,
            Side::Short => bucket <= (self.bins.n_bins() - 1) - self.config.exit_q_threshold,
        })
    }

    /// Limit price at which the position's return crosses the achievement
    /// boundary scaled by `achieve_ratio`, commission-adjusted when
    /// configured. Used for live profit-taking limit orders.
    pub fn price_to_achieve(&self, position: &Position) -> Result<f64, QuantraderError> {
        let bins = self.bins.get(&position.asset)?;
        let (entry_c, exit_c) = if self.config.achieved_with_commission {
            (
                self.config.commission.entry_total(),
                self.config.commission.exit_total(),
            )
        } else {
            (0.0, 0.0)
        };

        let price = match position.side {
            Side::Long => {
                let bin_value = boundary(bins, self.config.exit_q_threshold, &position.asset)?;
                position.entry_price * ((bin_value * self.config.achieve_ratio) + 1.0 + entry_c)
                    / (1.0 - exit_c)
            }
            Side::Short => {
                // Upper boundary of the highest achieving bucket: a fill at
                // this return classifies inside the achieving region, so the
                // limit price is consistent with check_if_achieved.
                let idx = (self.bins.n_bins() - 1) - self.config.exit_q_threshold;
                let bin_value = boundary(bins, idx, &position.asset)?;
                position.entry_price * ((bin_value * self.config.achieve_ratio) + 1.0 - entry_c)
                    / (1.0 + exit_c)
            }
        };
        Ok(price)
    }

    /// One full decision cycle against an owned account.
    pub fn run_cycle(
        &self,
        account: &mut Account,
        now: DateTime<Utc>,
        pricing: &HashMap<String, f64>,
        signals: &SignalSnapshot,
    ) -> Result<CycleReport, QuantraderError> {
        let decisions = self.evaluate_exits(&account.book, pricing, signals, now)?;
        let exits = self.apply_exits(account, &decisions, pricing)?;

        let cash = account.ledger.cash();
        let capital = account.ledger.capital(&account.book, pricing);
        let budget = self.order_budget(cash, capital);

        let candidates = self.entry_candidates(signals);
        let entries = self.apply_entries(account, &candidates, budget, pricing, now)?;

        Ok(CycleReport {
            at: now,
            cash: account.ledger.cash(),
            capital: account.ledger.capital(&account.book, pricing),
            positions: account.book.snapshot(),
            exits,
            entries,
        })
    }

    fn affordable(&self, ledger: &Ledger, cost: f64) -> bool {
        self.config.skip_affordability_check || ledger.is_affordable(cost)
    }
}

fn positive_or_zero(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn quote(pricing: &HashMap<String, f64>, asset: &str) -> Result<f64, QuantraderError> {
    pricing
        .get(asset)
        .copied()
        .ok_or_else(|| QuantraderError::InvariantViolation {
            reason: format!("no quote for held asset {asset}"),
        })
}

fn boundary(
    bins: &crate::domain::quantile::QuantileBins,
    idx: usize,
    asset: &str,
) -> Result<f64, QuantraderError> {
    bins.boundary(idx)
        .ok_or_else(|| QuantraderError::InvariantViolation {
            reason: format!("achievement boundary {idx} out of range for {asset}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::sample_trading_config;
    use crate::domain::ledger::Commission;
    use crate::domain::position::PositionMode;
    use crate::domain::quantile::QuantileBins;
    use chrono::TimeZone;

    fn at(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(min)
    }

    fn sample_bins() -> BinsMap {
        let mut m = HashMap::new();
        for asset in ["A", "B", "C"] {
            m.insert(
                asset.to_string(),
                QuantileBins::new(vec![-0.02, 0.0, 0.02]),
            );
        }
        BinsMap::new(m).unwrap()
    }

    fn make_engine(mutate: impl FnOnce(&mut TradingConfig)) -> DecisionEngine {
        let mut config = sample_trading_config();
        mutate(&mut config);
        DecisionEngine::new(config, sample_bins()).unwrap()
    }

    fn pricing(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(a, p)| (a.to_string(), *p)).collect()
    }

    fn signals(positive: &[&str], negative: &[&str]) -> SignalSnapshot {
        SignalSnapshot::new(
            positive.iter().map(|s| s.to_string()).collect(),
            negative.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn held_long(asset: &str, minutes_ago: i64, entry_price: f64) -> Position {
        Position::new(asset, Side::Long, 10.0, entry_price, at(-minutes_ago))
    }

    #[test]
    fn threshold_out_of_range_rejected_at_construction() {
        let mut config = sample_trading_config();
        config.exit_q_threshold = 4; // only 4 buckets, max index 3
        assert!(DecisionEngine::new(config, sample_bins()).is_err());
    }

    #[test]
    fn max_holding_forces_exit() {
        let engine = make_engine(|c| c.max_holding_minutes = 30);
        let mut book = PositionBook::new();
        book.open(held_long("A", 31, 100.0));

        let decisions = engine
            .evaluate_exits(&book, &pricing(&[("A", 100.0)]), &signals(&[], &[]), at(0))
            .unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].reason, ExitReason::MaxHoldingMinutes);
    }

    #[test]
    fn min_holding_grace_suppresses_everything() {
        let engine = make_engine(|c| c.min_holding_minutes = 5);
        let mut book = PositionBook::new();
        // Opposing signal AND achieved return, but only 3 minutes held.
        book.open(held_long("A", 3, 100.0));

        let decisions = engine
            .evaluate_exits(&book, &pricing(&[("A", 110.0)]), &signals(&[], &["A"]), at(0))
            .unwrap();
        assert!(decisions.is_empty());
    }

    #[test]
    fn boundary_minute_still_within_grace() {
        let engine = make_engine(|c| c.min_holding_minutes = 5);
        let mut book = PositionBook::new();
        book.open(held_long("A", 5, 100.0));
        let decisions = engine
            .evaluate_exits(&book, &pricing(&[("A", 100.0)]), &signals(&[], &["A"]), at(0))
            .unwrap();
        assert!(decisions.is_empty());
    }

    #[test]
    fn max_holding_takes_precedence_over_opposite_signal() {
        let engine = make_engine(|c| c.max_holding_minutes = 30);
        let mut book = PositionBook::new();
        book.open(held_long("A", 45, 100.0));

        let decisions = engine
            .evaluate_exits(&book, &pricing(&[("A", 100.0)]), &signals(&[], &["A"]), at(0))
            .unwrap();
        assert_eq!(decisions[0].reason, ExitReason::MaxHoldingMinutes);
    }

    #[test]
    fn opposite_signal_exits_long_on_negative() {
        let engine = make_engine(|_| {});
        let mut book = PositionBook::new();
        book.open(held_long("A", 5, 100.0));

        let decisions = engine
            .evaluate_exits(&book, &pricing(&[("A", 100.0)]), &signals(&[], &["A"]), at(0))
            .unwrap();
        assert_eq!(decisions[0].reason, ExitReason::OppositeSignal);
    }

    #[test]
    fn opposite_signal_exits_short_on_positive() {
        let engine = make_engine(|_| {});
        let mut book = PositionBook::new();
        book.open(Position::new("A", Side::Short, 10.0, 100.0, at(-5)));

        let decisions = engine
            .evaluate_exits(&book, &pricing(&[("A", 100.0)]), &signals(&["A"], &[]), at(0))
            .unwrap();
        assert_eq!(decisions[0].reason, ExitReason::OppositeSignal);
    }

    #[test]
    fn achievement_long_at_threshold_bucket() {
        // Buckets over [-inf,-0.02,0,0.02,inf]; threshold 3; return 0.03 → bucket 3.
        let engine = make_engine(|_| {});
        let position = held_long("A", 5, 100.0);
        assert!(engine.check_if_achieved(&position, 103.0).unwrap());
        // Return 0.01 → bucket 2 → not achieved.
        assert!(!engine.check_if_achieved(&position, 101.0).unwrap());
    }

    #[test]
    fn achievement_short_uses_mirrored_threshold() {
        let engine = make_engine(|_| {});
        let position = Position::new("A", Side::Short, 10.0, 100.0, at(-5));
        // threshold 3 of 4 buckets → short achieves at bucket <= 0 → return <= -0.02
        assert!(engine.check_if_achieved(&position, 97.0).unwrap());
        assert!(!engine.check_if_achieved(&position, 99.5).unwrap());
    }

    #[test]
    fn achievement_with_commission_shrinks_long_return() {
        let engine = make_engine(|c| {
            c.achieved_with_commission = true;
            c.commission = Commission::flat(0.0015);
        });
        let position = held_long("A", 5, 100.0);
        // Raw return 0.0201 would land in bucket 3, but the adjusted diff is
        // 2.01 - (100 + 102.01) * 0.0015 ~= 1.707, return ~0.017, bucket 2.
        assert!(!engine.check_if_achieved(&position, 102.01).unwrap());
        // A larger move still achieves.
        assert!(engine.check_if_achieved(&position, 103.0).unwrap());
    }

    #[test]
    fn unchanged_price_classifies_zero_return() {
        let engine = make_engine(|_| {});
        let position = held_long("A", 5, 100.0);
        assert!(!engine.check_if_achieved(&position, 100.0).unwrap());
    }

    #[test]
    fn apply_exits_deposits_and_compacts() {
        let engine = make_engine(|_| {});
        let mut account = Account::new(0.0, false);
        account.book.open(held_long("A", 45, 100.0));

        let decisions = vec![ExitDecision {
            position: account.book.find("A", Side::Long).unwrap().clone(),
            reason: ExitReason::MaxHoldingMinutes,
        }];
        let records = engine
            .apply_exits(&mut account, &decisions, &pricing(&[("A", 110.0)]))
            .unwrap();

        assert_eq!(records.len(), 1);
        assert!((records[0].profit - 1100.0).abs() < f64::EPSILON);
        assert!((records[0].pnl - 100.0).abs() < f64::EPSILON);
        assert!((account.ledger.cash() - 1100.0).abs() < f64::EPSILON);
        assert!(account.book.is_empty());
    }

    #[test]
    fn literal_entry_ratio_is_absolute_budget() {
        // Non-compounding: the configured ratio IS the currency budget.
        let engine = make_engine(|c| {
            c.entry_ratio = 0.1;
            c.compound_interest = false;
        });
        let budget = engine.order_budget(1000.0, 1000.0);
        assert!((budget - 0.1).abs() < f64::EPSILON);

        // qty at price 10 is 0.01, cost is the literal 0.1 at zero commission.
        let mut account = Account::new(1000.0, false);
        let entries = engine
            .apply_entries(
                &mut account,
                &[("A".to_string(), Side::Long)],
                budget,
                &pricing(&[("A", 10.0)]),
                at(0),
            )
            .unwrap();
        assert_eq!(entries[0].outcome, EntryOutcome::Signal);
        let pos = account.book.find("A", Side::Long).unwrap();
        assert!((pos.qty - 0.01).abs() < f64::EPSILON);
        assert!((account.ledger.cash() - 999.9).abs() < 1e-9);
    }

    #[test]
    fn compounding_budget_from_cash() {
        let engine = make_engine(|c| {
            c.compound_interest = true;
            c.order_criterion = OrderCriterion::Cash;
            c.entry_ratio = 0.1;
        });
        assert!((engine.order_budget(500.0, 900.0) - 50.0).abs() < f64::EPSILON);
        assert!(engine.order_budget(-500.0, 900.0).abs() < f64::EPSILON);
    }

    #[test]
    fn compounding_budget_from_capital() {
        let engine = make_engine(|c| {
            c.compound_interest = true;
            c.order_criterion = OrderCriterion::Capital;
            c.entry_ratio = 0.1;
        });
        assert!((engine.order_budget(500.0, 900.0) - 90.0).abs() < f64::EPSILON);
        assert!(engine.order_budget(0.0, f64::NAN).abs() < f64::EPSILON);
    }

    #[test]
    fn entry_candidates_respect_side_mode() {
        let engine = make_engine(|c| c.position_mode = PositionMode::Long);
        let s = signals(&["A"], &["B"]);
        assert_eq!(engine.entry_candidates(&s), vec![("A".to_string(), Side::Long)]);

        let engine = make_engine(|c| c.position_mode = PositionMode::LongShort);
        let candidates = engine.entry_candidates(&s);
        assert!(candidates.contains(&("A".to_string(), Side::Long)));
        assert!(candidates.contains(&("B".to_string(), Side::Short)));
    }

    #[test]
    fn no_self_hedge() {
        let engine = make_engine(|c| c.position_mode = PositionMode::LongShort);
        let mut account = Account::new(1000.0, false);
        account.book.open(held_long("A", 2, 100.0));

        let plan = engine
            .plan_entry(
                &account.book,
                &account.ledger,
                "A",
                Side::Short,
                10.0,
                &pricing(&[("A", 100.0)]),
                at(0),
            )
            .unwrap();
        assert_eq!(plan, EntryPlan::Skip(SkipReason::OppositePosition));
    }

    #[test]
    fn repeat_signal_merges_and_pays_incoming_cost_only() {
        let engine = make_engine(|c| {
            c.compound_interest = false;
            c.entry_ratio = 1000.0;
        });
        let mut account = Account::new(3000.0, false);
        account.book.open(Position::new("A", Side::Long, 10.0, 100.0, at(-3)));

        let entries = engine
            .apply_entries(
                &mut account,
                &[("A".to_string(), Side::Long)],
                1000.0,
                &pricing(&[("A", 125.0)]),
                at(0),
            )
            .unwrap();
        assert_eq!(entries[0].outcome, EntryOutcome::Updated);

        let pos = account.book.find("A", Side::Long).unwrap();
        assert!((pos.qty - 18.0).abs() < f64::EPSILON);
        // (10*100 + 8*125) / 18
        assert!((pos.entry_price - 2000.0 / 18.0).abs() < 1e-9);
        assert_eq!(pos.n_updated, 1);
        assert_eq!(pos.entry_at, at(0));
        assert!((account.ledger.cash() - 2000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn merge_cap_skips_without_paying() {
        let engine = make_engine(|c| c.max_n_updated = Some(0));
        let mut account = Account::new(1000.0, false);
        account.book.open(held_long("A", 3, 100.0));

        let entries = engine
            .apply_entries(
                &mut account,
                &[("A".to_string(), Side::Long)],
                100.0,
                &pricing(&[("A", 100.0)]),
                at(0),
            )
            .unwrap();
        assert_eq!(
            entries[0].outcome,
            EntryOutcome::Skipped(SkipReason::UpdateLimitReached)
        );
        assert!((account.ledger.cash() - 1000.0).abs() < f64::EPSILON);
        assert_eq!(account.book.find("A", Side::Long).unwrap().n_updated, 0);
    }

    #[test]
    fn unaffordable_entry_is_a_silent_skip() {
        let engine = make_engine(|_| {});
        let mut account = Account::new(50.0, false);

        let entries = engine
            .apply_entries(
                &mut account,
                &[("A".to_string(), Side::Long)],
                100.0,
                &pricing(&[("A", 10.0)]),
                at(0),
            )
            .unwrap();
        assert_eq!(
            entries[0].outcome,
            EntryOutcome::Skipped(SkipReason::NotAffordable)
        );
        assert!(account.book.is_empty());
        assert!((account.ledger.cash() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn debt_mode_allows_overspending() {
        let engine = make_engine(|c| c.possible_in_debt = true);
        let mut account = Account::new(50.0, true);

        let entries = engine
            .apply_entries(
                &mut account,
                &[("A".to_string(), Side::Long)],
                100.0,
                &pricing(&[("A", 10.0)]),
                at(0),
            )
            .unwrap();
        assert_eq!(entries[0].outcome, EntryOutcome::Signal);
        assert!(account.ledger.cash() < 0.0);
    }

    #[test]
    fn missing_entry_quote_skips() {
        let engine = make_engine(|_| {});
        let account = Account::new(1000.0, false);
        let plan = engine
            .plan_entry(
                &account.book,
                &account.ledger,
                "A",
                Side::Long,
                10.0,
                &HashMap::new(),
                at(0),
            )
            .unwrap();
        assert_eq!(plan, EntryPlan::Skip(SkipReason::NoQuote));
    }

    #[test]
    fn missing_exit_quote_is_fatal() {
        let engine = make_engine(|_| {});
        let mut account = Account::new(0.0, false);
        account.book.open(held_long("A", 45, 100.0));
        let decisions = vec![ExitDecision {
            position: account.book.find("A", Side::Long).unwrap().clone(),
            reason: ExitReason::MaxHoldingMinutes,
        }];
        let err = engine
            .apply_exits(&mut account, &decisions, &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, QuantraderError::InvariantViolation { .. }));
    }

    #[test]
    fn price_to_achieve_long_without_commission() {
        let engine = make_engine(|_| {});
        let position = held_long("A", 0, 100.0);
        // boundary(3) of [-0.02, 0, 0.02] is out of range → fatal with these
        // test bins; use threshold 2 instead.
        let engine2 = make_engine(|c| c.exit_q_threshold = 2);
        assert!(engine.price_to_achieve(&position).is_err());
        let price = engine2.price_to_achieve(&position).unwrap();
        // interior[2] = 0.02 → 100 * 1.02
        assert!((price - 102.0).abs() < 1e-9);
    }

    #[test]
    fn price_to_achieve_short_targets_achieving_bucket() {
        let engine = make_engine(|c| c.exit_q_threshold = 2);
        let position = Position::new("A", Side::Short, 1.0, 100.0, at(0));
        // short achieves at bucket <= 1, whose upper boundary is interior[1] = 0.0
        let price = engine.price_to_achieve(&position).unwrap();
        assert!((price - 100.0).abs() < 1e-9);

        // A fill at the limit price satisfies the achievement check.
        assert!(engine.check_if_achieved(&position, price).unwrap());
    }

    #[test]
    fn price_to_achieve_applies_commission_terms() {
        let engine = make_engine(|c| {
            c.exit_q_threshold = 2;
            c.achieved_with_commission = true;
            c.commission = Commission {
                entry: 0.001,
                exit: 0.002,
                spread: 0.0,
            };
        });
        let position = held_long("A", 0, 100.0);
        let price = engine.price_to_achieve(&position).unwrap();
        let expected = 100.0 * (0.02 + 1.0 + 0.001) / (1.0 - 0.002);
        assert!((price - expected).abs() < 1e-9);
    }

    #[test]
    fn run_cycle_reports_state_after_both_passes() {
        let engine = make_engine(|c| {
            c.entry_ratio = 100.0;
            c.position_mode = PositionMode::LongShort;
        });
        let mut account = Account::new(1000.0, false);
        account.book.open(held_long("A", 45, 100.0));

        let report = engine
            .run_cycle(
                &mut account,
                at(0),
                &pricing(&[("A", 110.0), ("B", 50.0)]),
                &signals(&["B"], &[]),
            )
            .unwrap();

        // A exited on max holding (deposit 1100), B entered for 100.
        assert_eq!(report.exits.len(), 1);
        assert_eq!(report.exits[0].reason, ExitReason::MaxHoldingMinutes);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].outcome, EntryOutcome::Signal);
        assert_eq!(report.positions.len(), 1);
        assert_eq!(report.positions[0].asset, "B");
        assert!((report.cash - 2000.0).abs() < f64::EPSILON);
        assert!((report.capital - 2100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn exited_positions_do_not_block_reentry_same_cycle() {
        // Exit pass removes A, entry pass may open it fresh on a signal.
        let engine = make_engine(|c| {
            c.entry_ratio = 100.0;
            c.min_holding_minutes = 0;
        });
        let mut account = Account::new(1000.0, false);
        account.book.open(Position::new("A", Side::Short, 1.0, 100.0, at(-45)));

        let report = engine
            .run_cycle(
                &mut account,
                at(0),
                &pricing(&[("A", 100.0)]),
                &signals(&["A"], &[]),
            )
            .unwrap();

        assert_eq!(report.exits.len(), 1);
        let pos = account.book.find("A", Side::Long).unwrap();
        assert!((pos.qty - 1.0).abs() < f64::EPSILON);
    }
}
