// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the replication coordinator.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::entity::{Document, EntityKind, OpClass, TenantId};

/// Engine lifecycle state.
///
/// Use [`super::MirrorSync::state()`] to check current state or
/// [`super::MirrorSync::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, not yet started
    Created,
    /// Resolving settings and connecting the document store
    Connecting,
    /// Accepting requests
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
    /// Cron stopped, no further flushes
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// What a sink error does to the rest of a tenant's batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the tenant's sequence for this stage at the first error
    #[default]
    AbortTenantBatch,
    /// Attempt every record regardless of earlier errors
    ContinueOnError,
}

/// Flush stages, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    EntityUpserts,
    EntityDeletes,
    FieldUpserts,
    FieldDeletes,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::EntityUpserts,
        Stage::EntityDeletes,
        Stage::FieldUpserts,
        Stage::FieldDeletes,
    ];

    pub fn op(&self) -> OpClass {
        match self {
            Stage::EntityUpserts | Stage::FieldUpserts => OpClass::Upsert,
            Stage::EntityDeletes | Stage::FieldDeletes => OpClass::Delete,
        }
    }

    /// Kinds drained by this stage, in order
    pub fn kinds(&self) -> &'static [EntityKind] {
        match self {
            Stage::EntityUpserts | Stage::EntityDeletes => &EntityKind::ENTITIES,
            Stage::FieldUpserts | Stage::FieldDeletes => &EntityKind::FIELDS,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EntityUpserts => write!(f, "entity-upserts"),
            Self::EntityDeletes => write!(f, "entity-deletes"),
            Self::FieldUpserts => write!(f, "field-upserts"),
            Self::FieldDeletes => write!(f, "field-deletes"),
        }
    }
}

/// Record counts for one (stage, kind).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Never attempted: abandoned after an error, or tenant switch failed
    pub skipped: usize,
}

impl StageCounts {
    fn add(&mut self, other: &StageCounts) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// A record that did not make it to the document store.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushError {
    pub stage: Stage,
    pub kind: EntityKind,
    pub tenant_id: TenantId,
    /// Filter of the failed record (empty when a whole tenant was skipped)
    pub filter: Document,
    pub message: String,
}

impl std::fmt::Display for FlushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} tenant={} filter={}: {}",
            self.stage,
            self.kind,
            self.tenant_id,
            serde_json::Value::Object(self.filter.clone()),
            self.message
        )
    }
}

/// Result of one flush cycle.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    counts: BTreeMap<(Stage, EntityKind), StageCounts>,
    pub errors: Vec<FlushError>,
    pub duration: Duration,
}

impl FlushReport {
    pub fn counts(&self, stage: Stage, kind: EntityKind) -> StageCounts {
        self.counts.get(&(stage, kind)).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn succeeded(&self, stage: Stage, kind: EntityKind) -> usize {
        self.counts(stage, kind).succeeded
    }

    /// Totals for a stage across kinds
    pub fn stage_totals(&self, stage: Stage) -> StageCounts {
        let mut totals = StageCounts::default();
        for ((s, _), counts) in &self.counts {
            if *s == stage {
                totals.add(counts);
            }
        }
        totals
    }

    /// Totals across all stages
    pub fn totals(&self) -> StageCounts {
        let mut totals = StageCounts::default();
        for counts in self.counts.values() {
            totals.add(counts);
        }
        totals
    }

    /// Stages that had work, in run order
    pub fn stages_run(&self) -> Vec<Stage> {
        let mut stages: Vec<Stage> = self.counts.keys().map(|(s, _)| *s).collect();
        stages.dedup();
        stages
    }

    /// Everything attempted succeeded and nothing was skipped
    #[must_use]
    pub fn is_success(&self) -> bool {
        let totals = self.totals();
        totals.failed == 0 && totals.skipped == 0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub(crate) fn record(&mut self, stage: Stage, kind: EntityKind, counts: StageCounts) {
        self.counts.entry((stage, kind)).or_default().add(&counts);
    }
}
