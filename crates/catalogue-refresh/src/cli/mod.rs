//! CLI subcommand implementations for the `catalogue` binary.

pub mod doctor;
pub mod output;
pub mod run_cmd;
pub mod schedule_cmd;
pub mod status;

use crate::config::RefreshConfig;
use crate::pipeline::CancelFlag;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;

/// Load configuration from defaults, the optional file and the environment.
pub fn load_config(path: Option<&Path>) -> Result<RefreshConfig> {
    RefreshConfig::load(path).context("failed to load configuration")
}

/// On Ctrl-C, raise `cancel` and wake whoever waits on the returned notifier.
pub fn cancel_on_ctrl_c(cancel: CancelFlag) -> Arc<Notify> {
    let stop = Arc::new(Notify::new());
    let notify = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal; stopping at the next stage boundary");
            cancel.cancel();
            notify.notify_one();
        }
    });
    stop
}
