// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Scheduled reconciliation.
//!
//! [`CronTable`] is the in-process schedule table: named recurrences and
//! pending events keyed by timestamp and hook. [`CronRegistrar`] installs or
//! cancels one hook per scannable kind, and [`CronDriver`] is the tokio task
//! that fires due hooks through the scanner.
//!
//! Cancelling is thorough. Clearing a hook only drops occurrences scheduled
//! without arguments, so the registrar also walks every pending occurrence
//! and unschedules each one with its own arguments.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::entity::{now_secs, EntityKind};

use super::scanner::ReconciliationScanner;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("Unknown recurrence '{0}'")]
    UnknownRecurrence(String),
    #[error("Recurrence '{0}' needs a non-zero interval")]
    InvalidInterval(String),
    #[error("Kind '{0}' has no reconciliation hook")]
    NotScannable(EntityKind),
}

/// One pending occurrence of a hook.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub timestamp: i64,
    pub hook: String,
    /// Named recurrence; `None` for one-off events
    pub recurrence: Option<String>,
    pub args: Vec<Value>,
}

#[derive(Default)]
struct CronState {
    intervals: HashMap<String, u64>,
    events: BTreeMap<i64, BTreeMap<String, Vec<ScheduledEvent>>>,
}

impl CronState {
    fn insert(&mut self, event: ScheduledEvent) {
        let slot = self
            .events
            .entry(event.timestamp)
            .or_default()
            .entry(event.hook.clone())
            .or_default();
        if !slot.iter().any(|e| e.args == event.args) {
            slot.push(event);
        }
    }

    fn prune(&mut self, timestamp: i64) {
        if let Some(hooks) = self.events.get_mut(&timestamp) {
            hooks.retain(|_, events| !events.is_empty());
            if hooks.is_empty() {
                self.events.remove(&timestamp);
            }
        }
    }
}

#[derive(Default)]
pub struct CronTable {
    state: Mutex<CronState>,
}

impl CronTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_interval(&self, name: &str, secs: u64) -> Result<(), CronError> {
        if secs == 0 {
            return Err(CronError::InvalidInterval(name.to_string()));
        }
        self.state.lock().intervals.insert(name.to_string(), secs);
        Ok(())
    }

    pub fn interval(&self, name: &str) -> Option<u64> {
        self.state.lock().intervals.get(name).copied()
    }

    /// Schedule `hook` at `timestamp`. Identical occurrences collapse into one.
    pub fn schedule_event(
        &self,
        timestamp: i64,
        recurrence: Option<&str>,
        hook: &str,
        args: Vec<Value>,
    ) -> Result<(), CronError> {
        let mut state = self.state.lock();
        if let Some(name) = recurrence {
            if !state.intervals.contains_key(name) {
                return Err(CronError::UnknownRecurrence(name.to_string()));
            }
        }
        state.insert(ScheduledEvent {
            timestamp,
            hook: hook.to_string(),
            recurrence: recurrence.map(str::to_string),
            args,
        });
        Ok(())
    }

    /// Earliest pending timestamp for `hook` with exactly these arguments.
    pub fn next_scheduled(&self, hook: &str, args: &[Value]) -> Option<i64> {
        let state = self.state.lock();
        state.events.iter().find_map(|(ts, hooks)| {
            hooks
                .get(hook)
                .filter(|events| events.iter().any(|e| e.args == args))
                .map(|_| *ts)
        })
    }

    pub fn unschedule_event(&self, timestamp: i64, hook: &str, args: &[Value]) -> bool {
        let mut state = self.state.lock();
        let removed = match state.events.get_mut(&timestamp).and_then(|hooks| hooks.get_mut(hook)) {
            Some(events) => {
                let before = events.len();
                events.retain(|e| e.args != args);
                before != events.len()
            }
            None => false,
        };
        state.prune(timestamp);
        removed
    }

    /// Drop every occurrence of `hook` scheduled without arguments.
    pub fn clear_scheduled_hook(&self, hook: &str) -> usize {
        let mut state = self.state.lock();
        let mut removed = 0;
        let timestamps: Vec<i64> = state.events.keys().copied().collect();
        for ts in timestamps {
            if let Some(events) = state.events.get_mut(&ts).and_then(|hooks| hooks.get_mut(hook)) {
                let before = events.len();
                events.retain(|e| !e.args.is_empty());
                removed += before - events.len();
            }
            state.prune(ts);
        }
        removed
    }

    /// Every pending occurrence, earliest first.
    pub fn pending(&self) -> Vec<ScheduledEvent> {
        let state = self.state.lock();
        state
            .events
            .values()
            .flat_map(|hooks| hooks.values().flatten().cloned())
            .collect()
    }

    pub fn is_pending(&self, hook: &str) -> bool {
        let state = self.state.lock();
        state.events.values().any(|hooks| hooks.contains_key(hook))
    }

    /// Remove and return everything due at `now`. Recurring events are put
    /// back one interval later (or one interval after `now` if they fell
    /// behind).
    pub fn take_due(&self, now: i64) -> Vec<ScheduledEvent> {
        let mut state = self.state.lock();
        let later = state.events.split_off(&(now + 1));
        let due_slots = std::mem::replace(&mut state.events, later);

        let mut due = Vec::new();
        for event in due_slots.into_values().flat_map(|hooks| hooks.into_values().flatten()) {
            let interval = event
                .recurrence
                .as_deref()
                .and_then(|name| state.intervals.get(name).copied());
            if let Some(interval) = interval {
                let mut next = event.timestamp + interval as i64;
                if next <= now {
                    next = now + interval as i64;
                }
                state.insert(ScheduledEvent { timestamp: next, ..event.clone() });
            }
            due.push(event);
        }
        due
    }
}

/// Result of initializing one kind's cron hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronAction {
    Scheduled { at: i64 },
    AlreadyScheduled { at: i64 },
    Cancelled { removed: usize },
}

/// Installs and cancels the per-kind reconciliation hooks.
pub struct CronRegistrar<'a> {
    table: &'a CronTable,
    interval_secs: u64,
}

impl<'a> CronRegistrar<'a> {
    pub const RECURRENCE: &'static str = "mirror_sync_import_every_fifteen_minutes";
    pub const SCANNABLE: [EntityKind; 3] = [EntityKind::ContentItem, EntityKind::TaxonomyTerm, EntityKind::User];

    pub fn new(table: &'a CronTable, interval_secs: u64) -> Self {
        Self { table, interval_secs }
    }

    pub fn hook(kind: EntityKind) -> Option<&'static str> {
        match kind {
            EntityKind::ContentItem => Some("mirror_sync_post"),
            EntityKind::TaxonomyTerm => Some("mirror_sync_term"),
            EntityKind::User => Some("mirror_sync_user"),
            _ => None,
        }
    }

    pub fn kind_for_hook(hook: &str) -> Option<EntityKind> {
        Self::SCANNABLE.into_iter().find(|kind| Self::hook(*kind) == Some(hook))
    }

    /// Schedule the kind's hook (first firing at `now`) or cancel every
    /// pending occurrence of it.
    pub fn init(&self, kind: EntityKind, enabled: bool, now: i64) -> Result<CronAction, CronError> {
        let hook = Self::hook(kind).ok_or(CronError::NotScannable(kind))?;

        if !enabled {
            let mut removed = self.table.clear_scheduled_hook(hook);
            for event in self.table.pending() {
                if event.hook == hook && self.table.unschedule_event(event.timestamp, hook, &event.args) {
                    removed += 1;
                }
            }
            debug!(hook, removed, "Cron hook cancelled");
            return Ok(CronAction::Cancelled { removed });
        }

        self.table.register_interval(Self::RECURRENCE, self.interval_secs)?;
        if let Some(at) = self.table.next_scheduled(hook, &[]) {
            return Ok(CronAction::AlreadyScheduled { at });
        }
        self.table.schedule_event(now, Some(Self::RECURRENCE), hook, Vec::new())?;
        info!(hook, every_secs = self.interval_secs, "Cron hook scheduled");
        Ok(CronAction::Scheduled { at: now })
    }
}

/// Background task firing due hooks through the scanner.
pub struct CronDriver {
    handle: JoinHandle<()>,
}

impl CronDriver {
    pub fn spawn(table: Arc<CronTable>, scanner: Arc<ReconciliationScanner>, tick: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                for event in table.take_due(now_secs()) {
                    let Some(kind) = CronRegistrar::kind_for_hook(&event.hook) else {
                        debug!(hook = %event.hook, "No scanner for hook");
                        continue;
                    };
                    match scanner.run(kind).await {
                        Ok(report) => debug!(%kind, found = report.found, untracked = report.untracked, "Scheduled scan done"),
                        Err(e) => warn!(%kind, error = %e, "Scheduled scan failed"),
                    }
                }
            }
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}
