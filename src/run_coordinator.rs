//! Runs the full ordered pipeline across every entity and direction,
//! bookkeeping each pass in `system_sync_runs` and aggregating the run-level
//! error summary (§4.7).

use crate::adapter::relational::RelationalAdapter;
use crate::adapter::sheet::SheetAdapter;
use crate::adapter::{LoadCarsSource, RemoteStoreAdapter};
use crate::conflict_resolver::Tolerances;
use crate::entity_syncer::{self, EntityStats, ErrorSummaryEntry};
use crate::error::SyncResult;
use crate::models::{Direction, EntityKind};
use crate::payload_preparer::BlankOverwriteRules;
use chrono::Utc;
use tracing::{error, info, warn};

/// `system_sync_runs.type` (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunType {
    Manual,
    Scheduled,
}

impl RunType {
    fn as_str(self) -> &'static str {
        match self {
            RunType::Manual => "manual",
            RunType::Scheduled => "scheduled",
        }
    }
}

/// Whole-run totals, printed by the CLI after every invocation.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub passes: Vec<(EntityKind, Direction, EntityStats)>,
    pub errors: Vec<ErrorSummaryEntry>,
}

pub struct RunCoordinator {
    relational: RelationalAdapter,
    sheet: SheetAdapter,
    tolerances: Tolerances,
    rules: BlankOverwriteRules,
}

impl RunCoordinator {
    pub fn new(
        relational: RelationalAdapter,
        sheet: SheetAdapter,
        tolerances: Tolerances,
        rules: BlankOverwriteRules,
    ) -> Self {
        Self { relational, sheet, tolerances, rules }
    }

    /// Runs every requested entity, sheet→relational first for all of them,
    /// then relational→sheet for all of them (§4.7).
    pub async fn run(&self, entities: &[EntityKind], run_type: RunType) -> RunSummary {
        let mut summary = RunSummary::default();

        for &direction in &[Direction::SheetToRelational, Direction::RelationalToSheet] {
            for &entity in entities {
                let (stats, mut errors) = self.run_one(entity, direction, run_type).await;
                summary.passes.push((entity, direction, stats));
                summary.errors.append(&mut errors);
            }
        }

        summary
    }

    async fn run_one(
        &self,
        entity: EntityKind,
        direction: Direction,
        run_type: RunType,
    ) -> (EntityStats, Vec<ErrorSummaryEntry>) {
        let started_at = Utc::now();
        let run_id = match self
            .relational
            .open_sync_run(entity.table_name(), &direction.to_string(), run_type.as_str(), started_at)
            .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(entity = %entity, %direction, error = %err, "failed to open sync_run row");
                None
            }
        };

        let relational_adapter: &dyn RemoteStoreAdapter = &self.relational;
        let sheet_adapter: &dyn RemoteStoreAdapter = &self.sheet;
        let load_cars_source: &dyn LoadCarsSource = &self.relational;

        let outcome: SyncResult<(EntityStats, Vec<ErrorSummaryEntry>)> = entity_syncer::sync_entity(
            relational_adapter,
            sheet_adapter,
            load_cars_source,
            entity,
            direction,
            self.tolerances,
            &self.rules,
        )
        .await;

        let (stats, errors) = match outcome {
            Ok(result) => result,
            Err(err) => {
                error!(entity = %entity, %direction, error = %err, "entity pass failed");
                let mut stats = EntityStats::default();
                stats.errors = 1;
                let failure = ErrorSummaryEntry {
                    entity,
                    direction,
                    kind: err.kind(),
                    message: err.to_string(),
                    record_ids: Vec::new(),
                };
                (stats, vec![failure])
            }
        };

        if let Some(run_id) = run_id {
            let finished_at = Utc::now();
            if let Err(err) = self
                .relational
                .close_sync_run(&run_id, stats.processed, stats.updated, stats.errors, finished_at)
                .await
            {
                warn!(entity = %entity, %direction, error = %err, "failed to close sync_run row");
            }
        }

        info!(
            entity = %entity,
            %direction,
            processed = stats.processed,
            created = stats.created,
            updated = stats.updated,
            errors = stats.errors,
            "pass finished"
        );

        (stats, errors)
    }
}
