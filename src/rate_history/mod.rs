//! Per-destination history of send rates that worked, persisted across calls.
pub mod constants;
pub mod legacy_format;
pub mod rate_history_error;
pub mod rate_history_file;
pub mod rate_history_manager;
pub use rate_history_error::RateHistoryError;
pub use rate_history_manager::RateHistoryManager;
