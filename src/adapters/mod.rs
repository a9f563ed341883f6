//! Concrete port implementations.

pub mod csv_dataset_adapter;
pub mod csv_report_adapter;
pub mod file_config_adapter;
pub mod paper_exchange_adapter;
pub mod replay_signal_adapter;
pub mod state_store_adapter;
