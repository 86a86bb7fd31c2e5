// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication coordinator.
//!
//! [`MirrorSync`] ties the pieces together:
//! - settings resolution and the document store driver
//! - the per-kind replicators fed by mutation notifications
//! - the end-of-request [`FlushCoordinator`]
//! - the reconciliation scanner and its cron hooks
//!
//! # Lifecycle
//!
//! ```text
//! Created → Connecting → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mirror_sync::{Collaborators, DriverRegistry, EngineState, HostTenantContext,
//!     InMemoryContentStore, InMemoryDocumentStore, MirrorConfig, MirrorSync, StaticSettings};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = MirrorConfig {
//!     connection_uri: Some("memory://local".into()),
//!     ..Default::default()
//! };
//! let collaborators = Collaborators::new(
//!     Arc::new(StaticSettings::new()),
//!     Arc::new(HostTenantContext::new(1)),
//!     Arc::new(InMemoryContentStore::new()),
//! );
//! let drivers = DriverRegistry::with_memory(Arc::new(InMemoryDocumentStore::new()));
//! let mut engine = MirrorSync::new(config, collaborators, drivers);
//!
//! assert_eq!(engine.state(), EngineState::Created);
//! engine.start().await.expect("start failed");
//! assert!(engine.is_running());
//! # }
//! ```

mod api;
mod flush;
mod lifecycle;
mod sink;
mod types;

pub use api::MutationEvent;
pub use flush::FlushCoordinator;
pub use sink::ReplicationSink;
pub use types::{EngineState, FailurePolicy, FlushError, FlushReport, Stage, StageCounts};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::config::MirrorConfig;
use crate::reconcile::{CronDriver, CronError, CronTable, ReconciliationScanner};
use crate::replicator::Replicators;
use crate::resilience::retry::RetryConfig;
use crate::settings::{ResolvedSettings, SettingsStore};
use crate::storage::registry::DriverRegistry;
use crate::storage::traits::{CounterStore, MarkerStore, RelationalSource, StoreError};
use crate::tenant::{ContextError, TenantContext};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Replication is not running")]
    NotStarted,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Cron(#[from] CronError),
}

/// Host-side collaborators the engine reads from and writes markers into.
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn SettingsStore>,
    pub tenants: Arc<dyn TenantContext>,
    pub markers: Arc<dyn MarkerStore>,
    pub source: Arc<dyn RelationalSource>,
    pub counters: Arc<dyn CounterStore>,
}

impl Collaborators {
    /// One content store serving as scan source, marker store and counter store.
    pub fn new<S>(settings: Arc<dyn SettingsStore>, tenants: Arc<dyn TenantContext>, content: Arc<S>) -> Self
    where
        S: RelationalSource + MarkerStore + CounterStore + 'static,
    {
        Self {
            settings,
            tenants,
            markers: content.clone(),
            source: content.clone(),
            counters: content,
        }
    }
}

/// Everything built by a successful `start()`.
pub(super) struct Runtime {
    pub(super) settings: ResolvedSettings,
    pub(super) replicators: Arc<Replicators>,
    pub(super) flusher: FlushCoordinator,
    pub(super) scanner: Arc<ReconciliationScanner>,
}

/// Replication engine.
///
/// Requests own their [`EntityBuffer`](crate::EntityBuffer): take one with
/// [`begin_request()`](Self::begin_request), feed it with
/// [`dispatch()`](Self::dispatch), hand it back to
/// [`finish_request()`](Self::finish_request). Nothing is buffered inside
/// the engine itself.
pub struct MirrorSync {
    pub(super) config: MirrorConfig,
    pub(super) collaborators: Collaborators,
    pub(super) drivers: DriverRegistry,
    pub(super) connect_retry: RetryConfig,
    pub(super) cron_tick: Duration,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,
    pub(super) state_rx: watch::Receiver<EngineState>,

    pub(super) runtime: Option<Runtime>,
    pub(super) cron: Arc<CronTable>,
    pub(super) cron_driver: Option<CronDriver>,
}

impl MirrorSync {
    /// Create an engine in `Created` state. Call [`start()`](Self::start)
    /// before dispatching anything.
    pub fn new(config: MirrorConfig, collaborators: Collaborators, drivers: DriverRegistry) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        Self {
            config,
            collaborators,
            drivers,
            connect_retry: RetryConfig::startup(),
            cron_tick: Duration::from_secs(1),
            state: state_tx,
            state_rx,
            runtime: None,
            cron: Arc::new(CronTable::new()),
            cron_driver: None,
        }
    }

    /// Retry policy for the initial document store connection.
    #[must_use]
    pub fn with_connect_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = retry;
        self
    }

    /// How often the cron driver checks for due hooks.
    #[must_use]
    pub fn with_cron_tick(mut self, tick: Duration) -> Self {
        self.cron_tick = tick;
        self
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Settings as resolved by the last `start()`.
    pub fn settings(&self) -> Option<&ResolvedSettings> {
        self.runtime.as_ref().map(|r| &r.settings)
    }

    pub fn cron_table(&self) -> Arc<CronTable> {
        self.cron.clone()
    }

    pub(super) fn runtime(&self) -> Result<&Runtime, SyncError> {
        self.runtime.as_ref().ok_or(SyncError::NotStarted)
    }

    pub(super) fn set_state(&self, state: EngineState) {
        let _ = self.state.send(state);
        crate::metrics::set_engine_state(&state.to_string());
    }
}
