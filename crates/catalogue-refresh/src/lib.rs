// Copyright 2026 Catalogue Refresh Contributors
// SPDX-License-Identifier: Apache-2.0

//! Weekly retailer catalogue refresh.
//!
//! Finds the current week's catalogue document on each retailer's site,
//! downloads it, renders every page to JPEG and swaps the published snapshot
//! (files plus store rows) so readers never see a mix of two weeks.

pub mod acquisition;
pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod locator;
pub mod orchestrator;
pub mod pipeline;
pub mod publish;
pub mod raster;
pub mod renderer;
pub mod schedule;
pub mod types;

pub use config::{RefreshConfig, RetailerConfig};
pub use error::{ErrorKind, RefreshError};
pub use orchestrator::{Orchestrator, RunSummary};
pub use pipeline::{CancelFlag, RetailerPipeline, RunOutcome, RunReport, Stage};
