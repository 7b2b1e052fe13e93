//! Persistent record of refresh runs.

pub mod logger;

pub use logger::{read_recent, RunLedger, RunRecord};
