use anyhow::{bail, Context, Result};
use clap::Parser;
use reqwest::Client;
use std::time::Duration;
use store_reconciler::adapter::relational::RelationalAdapter;
use store_reconciler::adapter::sheet::SheetAdapter;
use store_reconciler::config;
use store_reconciler::models::EntityKind;
use store_reconciler::run_coordinator::{RunCoordinator, RunType};
use store_reconciler::scheduler;
use tracing::info;

/// Reconciles records between the relational datastore and the sheet-backed
/// store (§6.1).
#[derive(Parser)]
#[command(name = "sync")]
struct Cli {
    /// Entities to sync (cars, locations, companies, users, loads, bookings,
    /// requests). Omit to sync all of them.
    entities: Vec<String>,

    /// Run once and exit instead of entering scheduled mode.
    #[arg(long)]
    once: bool,

    /// Interval, in minutes, between scheduled runs.
    #[arg(long)]
    interval_minutes: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();

    let entities = resolve_entities(&cli.entities)?;

    let app_config = config::load().context("loading configuration")?;

    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("building HTTP client")?;

    let relational = RelationalAdapter::new(client.clone(), app_config.relational);
    let sheet = SheetAdapter::new(client, app_config.sheet);
    let coordinator = RunCoordinator::new(relational, sheet, app_config.tolerances, app_config.rules);

    if cli.once {
        let summary = coordinator.run(&entities, RunType::Manual).await;
        for (entity, direction, stats) in &summary.passes {
            info!(
                entity = %entity,
                %direction,
                processed = stats.processed,
                created = stats.created,
                updated = stats.updated,
                skipped = stats.skipped,
                errors = stats.errors,
                "run summary"
            );
        }
        for err in &summary.errors {
            tracing::error!(
                entity = %err.entity,
                direction = %err.direction,
                kind = %err.kind,
                message = %err.message,
                record_ids = ?err.record_ids,
                "run error"
            );
        }
    } else {
        let interval_minutes = cli.interval_minutes.unwrap_or(app_config.interval_minutes);
        let interval = Duration::from_secs(interval_minutes.max(1) * 60);
        scheduler::run_scheduled(&coordinator, &entities, interval).await;
    }

    Ok(())
}

fn resolve_entities(names: &[String]) -> Result<Vec<EntityKind>> {
    if names.is_empty() {
        return Ok(EntityKind::ALL.to_vec());
    }

    let mut resolved = Vec::with_capacity(names.len());
    let mut unknown = Vec::new();
    for name in names {
        match EntityKind::parse_cli_name(name) {
            Some(kind) => resolved.push(kind),
            None => unknown.push(name.clone()),
        }
    }

    if !unknown.is_empty() {
        let valid: Vec<&str> = EntityKind::ALL.iter().map(|k| k.table_name()).collect();
        bail!("unknown entity name(s) {}; valid names are: {}", unknown.join(", "), valid.join(", "));
    }

    Ok(resolved)
}
