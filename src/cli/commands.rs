//! CLI command implementations
//!
//! Commands build their own tokio runtime; `main` stays synchronous.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::config::SyncConfig;
use crate::conflict::{ActiveConflict, ResolutionPolicy};
use crate::delivery::{DeliveryEngine, MemoryTransport, StaticDirectory};
use crate::observability::{init_tracing, Event, MetricsRegistry, MetricsSnapshot};
use crate::operation::{Mutation, OperationHandle, OperationKind, OperationState};
use crate::record::{Bill, LineItem, OperationId, Participant, RecordId};
use crate::replication::{BalanceSummary, ReplicationCore};
use crate::store::MemoryStore;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Config { config } => show_config(config.as_deref()),
        Command::Simulate { config, json_logs } => simulate(config.as_deref(), json_logs),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<SyncConfig> {
    let config = match path {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    config.validate()?;
    info!(
        event = Event::ConfigLoaded.as_str(),
        source = %path.map(|p| p.display().to_string()).unwrap_or_else(|| "defaults".into()),
        operation_timeout_ms = config.replication.operation_timeout.as_millis() as u64,
        batch_size = config.delivery.batch_size,
    );
    Ok(config)
}

/// Print the effective configuration after defaults and validation
pub fn show_config(config_path: Option<&Path>) -> CliResult<()> {
    let config = load_config(config_path)?;
    write_response(&config)
}

/// Run the simulated session and print its report
pub fn simulate(config_path: Option<&Path>, json_logs: bool) -> CliResult<()> {
    init_tracing(json_logs);
    let config = load_config(config_path)?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::runtime_error(format!("Failed to create tokio runtime: {}", e)))?;
    let report = rt.block_on(run_simulation(config))?;
    write_response(&report)
}

/// How one simulated operation ended.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    pub step: &'static str,
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub state: OperationState,
    pub error: Option<&'static str>,
}

/// Everything the simulation observed.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub outcomes: Vec<OperationOutcome>,
    /// Conflicts as they were before being resolved
    pub conflicts: Vec<ActiveConflict>,
    pub owner_view: Vec<Bill>,
    pub peer_view: Vec<Bill>,
    pub balances: BalanceSummary,
    pub deliveries: usize,
    pub metrics: MetricsSnapshot,
}

async fn settle(step: &'static str, core: &ReplicationCore, handle: OperationHandle) -> CliResult<OperationOutcome> {
    let state = handle.settled().await;
    let error = core.operation_error(handle.id())?.map(|e| e.code());
    Ok(OperationOutcome {
        step,
        operation_id: handle.id(),
        kind: handle.kind(),
        state,
        error,
    })
}

/// Poll until `check` holds; the feed is applied asynchronously.
async fn wait_for<F>(what: &str, mut check: F) -> CliResult<()>
where
    F: FnMut() -> CliResult<bool>,
{
    for _ in 0..500 {
        if check()? {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(CliError::simulation_failed(format!("timed out waiting for {}", what)))
}

fn confirmed(core: &ReplicationCore, id: RecordId) -> CliResult<Bill> {
    core.confirmed_view()?
        .into_iter()
        .find(|b| b.id == id)
        .ok_or_else(|| CliError::simulation_failed(format!("record {} not confirmed", id)))
}

/// Two clients, alice (owner) and bob, sharing one in-memory store.
///
/// 1. alice creates a bill
/// 2. another device renames it; alice's stale currency edit auto-resolves
/// 3. another device changes the total; alice's stale edit conflicts and is
///    resolved with a merge
/// 4. bob, who does not own the bill, tries to delete it
pub async fn run_simulation(config: SyncConfig) -> CliResult<SimulationReport> {
    let store = Arc::new(MemoryStore::new());
    let metrics = Arc::new(MetricsRegistry::new());
    let transport = Arc::new(MemoryTransport::new());
    let directory = Arc::new(StaticDirectory::for_participants(["alice", "bob", "carol"]));
    let delivery = DeliveryEngine::new(
        config.delivery.clone(),
        transport.clone(),
        directory,
        Arc::clone(&metrics),
    )
    .spawn();

    let client = |actor: &str| {
        ReplicationCore::new(
            actor,
            config.replication.clone(),
            store.clone(),
            Some(delivery.clone()),
            Arc::clone(&metrics),
        )
    };
    let alice = client("alice");
    let bob = client("bob");
    alice.attach_feed()?;
    bob.attach_feed()?;

    let mut outcomes = Vec::new();

    let draft = Bill::draft("alice", "Team dinner")
        .with_participant(Participant::new("alice", "Alice"))
        .with_participant(Participant::new("bob", "Bob"))
        .with_participant(Participant::new("carol", "Carol"))
        .with_item(LineItem::new("Pizza", 36.0, ["alice", "bob", "carol"]))
        .with_item(LineItem::new("Wine", 24.0, ["alice", "bob"]));
    let created = alice.submit(Mutation::Create(draft))?;
    let record_id = created.record_id();
    outcomes.push(settle("create", &alice, created).await?);
    wait_for("bob to see the bill", || {
        Ok(bob.confirmed_view()?.iter().any(|b| b.id == record_id))
    })
    .await?;

    let stale = confirmed(&alice, record_id)?;
    store
        .remote_edit(&record_id, |b| b.name = "Team dinner (Friday)".into())
        .map_err(|e| CliError::simulation_failed(e.to_string()))?;
    let mut edit = stale;
    edit.currency = "EUR".into();
    let handle = alice.submit(Mutation::Update(edit))?;
    outcomes.push(settle("cosmetic_update", &alice, handle).await?);

    let stale = confirmed(&alice, record_id)?;
    store
        .remote_edit(&record_id, |b| b.total_amount += 10.0)
        .map_err(|e| CliError::simulation_failed(e.to_string()))?;
    let mut edit = stale;
    edit.name = "Team dinner + dessert".into();
    let handle = alice.submit(Mutation::Update(edit))?;
    outcomes.push(settle("financial_update", &alice, handle).await?);

    let conflicts = alice.active_conflicts()?;
    for active in &conflicts {
        if let Some(handle) = alice.resolve_conflict(active.conflict.operation_id, ResolutionPolicy::Merge)? {
            outcomes.push(settle("merge_resolution", &alice, handle).await?);
        }
    }

    let handle = bob.submit(Mutation::Delete(record_id))?;
    outcomes.push(settle("peer_delete", &bob, handle).await?);

    let latest = confirmed(&alice, record_id)?.version;
    wait_for("bob to catch up", || {
        Ok(bob.confirmed_view()?.iter().any(|b| b.id == record_id && b.version == latest))
    })
    .await?;
    delivery
        .flush()
        .await
        .map_err(|e| CliError::simulation_failed(e.to_string()))?;

    let report = SimulationReport {
        outcomes,
        conflicts,
        owner_view: alice.optimistic_view()?,
        peer_view: bob.optimistic_view()?,
        balances: alice.aggregate_balances()?,
        deliveries: transport.delivered().len(),
        metrics: metrics.snapshot(),
    };
    alice.shutdown()?;
    bob.shutdown()?;
    Ok(report)
}
