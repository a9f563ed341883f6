//! Summary statistics over a backtest result.

use crate::domain::backtest::BacktestResult;
use crate::domain::engine::ExitReason;

#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub total_return: f64,
    pub max_drawdown: f64,
    pub total_trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub win_rate: f64,
    pub avg_pnl: f64,
    pub exits_max_holding: usize,
    pub exits_opposite_signal: usize,
    pub exits_achieved: usize,
}

impl Metrics {
    pub fn compute(result: &BacktestResult) -> Self {
        let initial = result.initial_cash;
        let final_capital = result.final_capital();

        let total_return = if initial > 0.0 {
            (final_capital - initial) / initial
        } else {
            0.0
        };

        let capital_curve: Vec<f64> = result.cycles.iter().map(|c| c.capital).collect();
        let max_drawdown = compute_drawdown(&capital_curve);

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut total_pnl = 0.0_f64;
        let mut exits_max_holding = 0usize;
        let mut exits_opposite_signal = 0usize;
        let mut exits_achieved = 0usize;

        for exit in result.cycles.iter().flat_map(|c| c.exits.iter()) {
            if exit.pnl > 0.0 {
                trades_won += 1;
            } else if exit.pnl < 0.0 {
                trades_lost += 1;
            }
            total_pnl += exit.pnl;
            match exit.reason {
                ExitReason::MaxHoldingMinutes => exits_max_holding += 1,
                ExitReason::OppositeSignal => exits_opposite_signal += 1,
                ExitReason::Achieved => exits_achieved += 1,
            }
        }

        let total_trades = exits_max_holding + exits_opposite_signal + exits_achieved;
        let win_rate = if total_trades > 0 {
            trades_won as f64 / total_trades as f64
        } else {
            0.0
        };
        let avg_pnl = if total_trades > 0 {
            total_pnl / total_trades as f64
        } else {
            0.0
        };

        Metrics {
            total_return,
            max_drawdown,
            total_trades,
            trades_won,
            trades_lost,
            win_rate,
            avg_pnl,
            exits_max_holding,
            exits_opposite_signal,
            exits_achieved,
        }
    }
}

fn compute_drawdown(capital_curve: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;

    for &capital in capital_curve {
        if capital > peak {
            peak = capital;
        } else if peak > 0.0 {
            let dd = (peak - capital) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd
}
