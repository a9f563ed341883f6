//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::adapters::csv_dataset_adapter::CsvDatasetAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::paper_exchange_adapter::PaperExchangeAdapter;
use crate::adapters::replay_signal_adapter::ReplaySignalAdapter;
use crate::adapters::state_store_adapter::StateStoreAdapter;
use crate::domain::backtest::run_backtest;
use crate::domain::config::TradingConfig;
use crate::domain::engine::DecisionEngine;
use crate::domain::error::QuantraderError;
use crate::domain::ledger::Commission;
use crate::domain::metrics::Metrics;
use crate::domain::trader::Trader;
use crate::ports::config_port::ConfigPort;
use crate::ports::exchange_port::ExchangePort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "quantrader", about = "Quantile-signal trading engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a historical dataset through the decision engine
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        dataset: Option<PathBuf>,
    },
    /// Run the live trading loop against the paper exchange
    Trade {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        dataset: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            output,
            dataset,
        } => run_backtest_command(&config, output.as_ref(), dataset.as_ref()),
        Command::Trade { config, dataset } => run_trade_command(&config, dataset.as_ref()),
        Command::Validate { config } => run_validate(&config),
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = QuantraderError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn resolve_dataset_dir(
    override_path: Option<&PathBuf>,
    adapter: &FileConfigAdapter,
) -> Result<PathBuf, QuantraderError> {
    if let Some(p) = override_path {
        return Ok(p.clone());
    }
    adapter
        .get_string("backtest", "dataset_dir")
        .map(PathBuf::from)
        .ok_or_else(|| QuantraderError::ConfigMissing {
            section: "backtest".into(),
            key: "dataset_dir".into(),
        })
}

fn run_backtest_command(
    config_path: &PathBuf,
    output_path: Option<&PathBuf>,
    dataset_override: Option<&PathBuf>,
) -> ExitCode {
    // Stage 1: Load and validate config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let trading_config = match TradingConfig::from_config(&adapter) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    // Stage 2: Load dataset and bins
    let dataset_dir = match resolve_dataset_dir(dataset_override, &adapter) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };
    eprintln!("Loading dataset from {}", dataset_dir.display());
    let dataset_adapter = CsvDatasetAdapter::new(dataset_dir);
    let (bins, dataset) = match dataset_adapter
        .load_bins()
        .and_then(|bins| dataset_adapter.load_dataset().map(|d| (bins, d)))
    {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    // Stage 3: Build engine and replay
    let engine = match DecisionEngine::new(trading_config, bins) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };
    let initial_capital = adapter.get_double("backtest", "initial_capital", 100_000.0);

    eprintln!("Running backtest: {} steps", dataset.len());
    let result = match run_backtest(&dataset, &engine, initial_capital) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    // Stage 4: Print summary
    let metrics = Metrics::compute(&result);
    eprintln!("\n=== Results ===");
    eprintln!("Final Cash:       {:.2}", result.final_cash());
    eprintln!("Final Capital:    {:.2}", result.final_capital());
    eprintln!("Total Return:     {:.2}%", metrics.total_return * 100.0);
    eprintln!("Max Drawdown:     -{:.1}%", metrics.max_drawdown * 100.0);
    eprintln!("Total Trades:     {}", metrics.total_trades);
    eprintln!("Win Rate:         {:.1}%", metrics.win_rate * 100.0);
    eprintln!(
        "Exits:            max_holding({}), opposite({}), achieved({})",
        metrics.exits_max_holding, metrics.exits_opposite_signal, metrics.exits_achieved,
    );

    // Stage 5: Write report
    let output = output_path
        .cloned()
        .unwrap_or_else(|| PathBuf::from("report.csv"));
    match CsvReportAdapter::new().write(&result, &output) {
        Ok(()) => {
            eprintln!("\nReport written to: {}", output.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

/// Paper session: the live loop driven over the dataset timeline, with
/// fills, limit orders, and balances simulated in memory. Real venues plug
/// in through the same `ExchangePort`.
fn run_trade_command(config_path: &PathBuf, dataset_override: Option<&PathBuf>) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let trading_config = match TradingConfig::from_config(&adapter) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let dataset_dir = match resolve_dataset_dir(dataset_override, &adapter) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };
    eprintln!("Loading dataset from {}", dataset_dir.display());
    let dataset_adapter = CsvDatasetAdapter::new(dataset_dir);
    let (bins, dataset) = match dataset_adapter
        .load_bins()
        .and_then(|bins| dataset_adapter.load_dataset().map(|d| (bins, d)))
    {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let state_dir = adapter
        .get_string("trader", "state_path")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("state"));
    let paper_cash = adapter.get_double("trader", "paper_cash", 10_000.0);
    let commission = trading_config.commission;

    match run_paper_session(
        trading_config,
        bins,
        &dataset,
        state_dir,
        paper_cash,
        commission,
    ) {
        Ok(()) => {
            eprintln!("[O] Done: paper session complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("[!] Error: {e}");
            (&e).into()
        }
    }
}

fn run_paper_session(
    trading_config: TradingConfig,
    bins: crate::domain::quantile::BinsMap,
    dataset: &crate::domain::backtest::HistoricalDataset,
    state_dir: PathBuf,
    paper_cash: f64,
    commission: Commission,
) -> Result<(), QuantraderError> {
    let engine = DecisionEngine::new(trading_config, bins)?;
    let start = dataset
        .steps()
        .first()
        .map(|s| s.at)
        .ok_or_else(|| QuantraderError::Dataset {
            reason: "dataset is empty".into(),
        })?;

    let exchange = PaperExchangeAdapter::new(paper_cash, commission, start);
    let signals = ReplaySignalAdapter::new(dataset);
    let store = StateStoreAdapter::new(state_dir)?;

    let mut trader = Trader::new(engine, exchange, signals, store)?;
    trader.initialize_order_books()?;

    for step in dataset.steps() {
        // The paper venue learns the quotes the trader will see this minute;
        // each step is one live iteration.
        trader.exchange_mut().set_clock(step.at);
        trader.exchange_mut().set_pricing(step.pricing.clone());
        trader.trade_once(step.at)?;
    }

    let balance = trader.exchange().fetch_balance()?;
    eprintln!("[_] Final: free {:.2}, total {:.2}", balance.free, balance.total);
    Ok(())
}

fn run_validate(config_path: &PathBuf) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let trading_config = match TradingConfig::from_config(&adapter) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    eprintln!("  position_side:        {:?}", trading_config.position_mode);
    eprintln!("  entry_ratio:          {}", trading_config.entry_ratio);
    eprintln!(
        "  holding window:       {}..{} minutes",
        trading_config.min_holding_minutes, trading_config.max_holding_minutes,
    );
    eprintln!("  compound_interest:    {}", trading_config.compound_interest);
    eprintln!("  exit_q_threshold:     {}", trading_config.exit_q_threshold);

    if let Ok(dataset_dir) = resolve_dataset_dir(None, &adapter) {
        match CsvDatasetAdapter::new(dataset_dir).load_bins() {
            Ok(bins) => eprintln!("  quantile bins:        {} buckets", bins.n_bins()),
            Err(e) => {
                eprintln!("error: {e}");
                return (&e).into();
            }
        }
    }

    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}
