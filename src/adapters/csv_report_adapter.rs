//! CSV report writer: one row per decision cycle.

use std::path::Path;

use crate::domain::backtest::BacktestResult;
use crate::domain::engine::CycleReport;
use crate::domain::error::QuantraderError;
use crate::ports::report_port::ReportPort;

pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CsvReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, result: &BacktestResult, output_path: &Path) -> Result<(), QuantraderError> {
        let mut writer =
            csv::Writer::from_path(output_path).map_err(|e| QuantraderError::Dataset {
                reason: format!("failed to create {}: {}", output_path.display(), e),
            })?;

        writer
            .write_record([
                "timestamp",
                "cash",
                "capital",
                "n_positions",
                "exits",
                "entries",
            ])
            .map_err(|e| write_error(output_path, e))?;

        for cycle in &result.cycles {
            writer
                .write_record([
                    cycle.at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    format!("{:.8}", cycle.cash),
                    format!("{:.8}", cycle.capital),
                    cycle.positions.len().to_string(),
                    format_exits(cycle),
                    format_entries(cycle),
                ])
                .map_err(|e| write_error(output_path, e))?;
        }

        writer.flush()?;
        Ok(())
    }
}

fn format_exits(cycle: &CycleReport) -> String {
    cycle
        .exits
        .iter()
        .map(|e| format!("{}:{}", e.asset, e.reason.as_str()))
        .collect::<Vec<_>>()
        .join("|")
}

/// Skipped entries are an implicit no-op and stay out of the report.
fn format_entries(cycle: &CycleReport) -> String {
    cycle
        .entries
        .iter()
        .filter_map(|e| e.outcome.as_str().map(|key| format!("{}:{}", e.asset, key)))
        .collect::<Vec<_>>()
        .join("|")
}

fn write_error(path: &Path, e: csv::Error) -> QuantraderError {
    QuantraderError::Dataset {
        reason: format!("failed to write {}: {}", path.display(), e),
    }
}
