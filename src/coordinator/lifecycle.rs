// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle: start and shutdown.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::eligibility::EligibilityFilter;
use crate::entity::{now_secs, TableNamer};
use crate::reconcile::{CronDriver, CronRegistrar, ReconciliationScanner};
use crate::replicator::Replicators;
use crate::resilience::retry::retry_if;
use crate::settings::ResolvedSettings;
use crate::storage::traits::{DocumentStore, StoreError};

use super::{EngineState, FlushCoordinator, MirrorSync, ReplicationSink, Runtime, SyncError};

impl MirrorSync {
    /// Start replicating.
    ///
    /// Startup flow:
    /// 1. Resolve settings (host store + config + overrides)
    /// 2. Connect the document store for the configured uri
    /// 3. Build replicators, flush coordinator and scanner
    /// 4. Register cron recurrences, then schedule or cancel each scan hook
    /// 5. Spawn the cron driver when cron is enabled
    ///
    /// Calling `start()` on a running engine is a no-op.
    #[tracing::instrument(skip(self), fields(multi_tenant = self.config.multi_tenant))]
    pub async fn start(&mut self) -> Result<(), SyncError> {
        if self.runtime.is_some() {
            return Ok(());
        }
        let startup = Instant::now();
        self.set_state(EngineState::Connecting);

        let settings = ResolvedSettings::resolve(&self.config, self.collaborators.settings.as_ref());
        let Some(uri) = settings.connection_uri.clone() else {
            self.set_state(EngineState::Created);
            return Err(SyncError::Config("no document store connection uri configured".into()));
        };

        let store = match self.connect(&uri).await {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, "Document store connection failed");
                self.set_state(EngineState::Created);
                return Err(e.into());
            }
        };
        info!(database = %settings.database_name, "Document store connected");

        let eligibility = Arc::new(EligibilityFilter::new(
            settings.allow_lists.clone(),
            settings.excluded_field_keys.clone(),
        ));
        let replicators = Arc::new(Replicators::new(eligibility.clone(), self.collaborators.markers.clone()));
        let flusher = FlushCoordinator::new(
            Arc::new(ReplicationSink::new(store, settings.database_name.clone())),
            self.collaborators.tenants.clone(),
            self.collaborators.markers.clone(),
            TableNamer::new(self.config.table_prefix.clone(), self.config.main_tenant),
            self.config.multi_tenant,
            self.config.failure_policy,
        );
        let scanner = Arc::new(ReconciliationScanner::new(
            eligibility,
            replicators.clone(),
            flusher.clone(),
            self.collaborators.source.clone(),
            self.collaborators.counters.clone(),
            self.collaborators.tenants.clone(),
            self.config.scan_page_size,
        ));

        if let Err(e) = self.init_cron(&settings, &scanner) {
            self.set_state(EngineState::Created);
            return Err(e);
        }

        self.runtime = Some(Runtime {
            settings,
            replicators,
            flusher,
            scanner,
        });
        self.set_state(EngineState::Running);
        crate::metrics::record_startup(startup.elapsed());
        info!(elapsed_ms = startup.elapsed().as_millis() as u64, "Replication running");
        Ok(())
    }

    /// Stop the cron driver and drop the runtime. Buffers still held by
    /// callers can no longer be flushed.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&mut self) {
        self.set_state(EngineState::ShuttingDown);
        if let Some(driver) = self.cron_driver.take() {
            driver.shutdown();
        }
        self.runtime = None;
        self.set_state(EngineState::Stopped);
        info!("Replication stopped");
    }

    async fn connect(&self, uri: &str) -> Result<Arc<dyn DocumentStore>, StoreError> {
        // Unknown schemes fail here, before any retry
        let connector = self.drivers.connector_for(uri)?;
        retry_if("document_store_connect", &self.connect_retry, StoreError::is_transient, || {
            connector.connect(uri)
        })
        .await
    }

    fn init_cron(&mut self, settings: &ResolvedSettings, scanner: &Arc<ReconciliationScanner>) -> Result<(), SyncError> {
        for (name, secs) in &settings.cron_intervals {
            self.cron.register_interval(name, *secs)?;
        }

        let registrar = CronRegistrar::new(&self.cron, self.config.cron_interval_secs);
        let now = now_secs();
        for kind in CronRegistrar::SCANNABLE {
            let action = registrar.init(kind, settings.cron_enabled, now)?;
            debug!(%kind, ?action, "Cron hook initialized");
        }

        if settings.cron_enabled && self.cron_driver.is_none() {
            self.cron_driver = Some(CronDriver::spawn(self.cron.clone(), scanner.clone(), self.cron_tick));
        }
        Ok(())
    }
}
