// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconciliation: the scanner that re-replicates unconfirmed entities, and
//! the cron hooks that drive it.

pub mod cron;
pub mod scanner;

pub use cron::{CronAction, CronDriver, CronError, CronRegistrar, CronTable, ScheduledEvent};
pub use scanner::{counter_name, ReconciliationScanner, ScanReport};
