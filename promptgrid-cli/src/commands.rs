//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use promptgrid_core::checkpoint::{CheckpointStore, read_records};
use promptgrid_core::config::{ProviderKind, SweepConfig, WORKSPACE_CONFIG_FILE};
use promptgrid_core::error::ErrorKind;
use promptgrid_core::orchestrator::{Orchestrator, RunContext, RunSummary};
use promptgrid_core::providers::{ProviderClient, resolve_api_key};
use promptgrid_core::report::{export_csv, render_table, summarize};
use promptgrid_core::tasks::{load_cot_exemplar, verify_tasks};
use promptgrid_core::types::Technique;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config: SweepConfig,
) -> anyhow::Result<()> {
    match command {
        Commands::Run { parallel } => handle_run(config, parallel).await,
        Commands::Status => handle_status(config),
        Commands::Verify => handle_verify(&config),
        Commands::Report => handle_report(&config),
        Commands::Export { out } => handle_export(&config, &out),
        Commands::Repair => handle_repair(&config),
        Commands::Config { action } => handle_config(action, workspace, &config),
    }
}

async fn handle_run(mut config: SweepConfig, parallel: bool) -> anyhow::Result<()> {
    if parallel {
        config.run.parallel_providers = true;
    }
    for warning in config.validate()? {
        warn!("{}", warning);
    }

    let client = ProviderClient::from_config(&config)?;
    let results_path = config.paths.results.clone();
    let checkpoint_path = config.paths.checkpoint.clone();
    let orchestrator = Orchestrator::new(config, client)?;
    let ctx = RunContext::open(&results_path, &checkpoint_path)?;

    // Ctrl-C stops new units; in-flight ones still commit
    let token = ctx.cancellation_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight units");
            token.cancel();
        }
    });

    let outcome = orchestrator.run(&ctx).await;
    watcher.abort();
    // Close on both paths so every committed unit is durable
    ctx.close().await?;
    let summary = outcome?;

    print_summary(&summary);
    let records = read_records(&results_path)?;
    if !records.is_empty() {
        println!();
        print!("{}", render_table(&summarize(&records)));
    }

    if summary.has_client_errors() {
        anyhow::bail!(
            "{} unit(s) were rejected by a provider; check API keys and model names",
            summary.failures.get(&ErrorKind::Client).copied().unwrap_or(0)
        );
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Run {}", summary.run_id);
    println!(
        "  planned {}  skipped {}  committed {}  correct {}  empty {}",
        summary.planned,
        summary.skipped,
        summary.committed,
        summary.correct,
        summary.empty_predictions
    );
    for (kind, count) in &summary.failures {
        println!("  failed ({}): {}", kind, count);
    }
    for message in &summary.client_errors {
        println!("  client error: {}", message);
    }
    if summary.cancelled {
        println!("  cancelled before completion; rerun to resume");
    }
}

fn handle_status(config: SweepConfig) -> anyhow::Result<()> {
    // Read-only: status never truncates or rebuilds anything
    let (store, report) = CheckpointStore::inspect(&config.paths.results, &config.paths.checkpoint)?;
    let retry = config.retry.clone();
    let orchestrator = Orchestrator::new(config, ProviderClient::new(retry))?;
    let plan = orchestrator.plan(&store);

    println!(
        "{} of {} units done, {} remaining",
        plan.done,
        plan.total,
        plan.remaining.len()
    );
    let mut by_model: BTreeMap<&str, usize> = BTreeMap::new();
    for unit in &plan.remaining {
        *by_model.entry(unit.model_id.as_str()).or_default() += 1;
    }
    for (model, remaining) in by_model {
        println!("  {:<16} {} remaining", model, remaining);
    }
    if let Some(next) = plan.remaining.first() {
        println!("Next unit: {}", next);
    }
    if report.truncated_lines > 0 || report.missing_markers > 0 {
        println!(
            "  {} torn line(s) and {} unmarked row(s) will be reconciled on the next run",
            report.truncated_lines, report.missing_markers
        );
    }
    if report.orphan_markers > 0 {
        println!(
            "  {} marker(s) have no result row; run `promptgrid repair` before the next run",
            report.orphan_markers
        );
    }
    Ok(())
}

fn handle_verify(config: &SweepConfig) -> anyhow::Result<()> {
    for warning in config.validate()? {
        println!("warning: {}", warning);
    }

    let params = &config.parameters;
    let required = params.examples_per_task + params.few_shot_examples;
    let mut problems = 0;

    for check in verify_tasks(&config.paths.tasks_dir, &config.tasks, required) {
        match check.outcome {
            Ok(n) => println!("  ok    {:<28} {} examples", check.task_id, n),
            Err(e) => {
                problems += 1;
                println!("  FAIL  {:<28} {}", check.task_id, e);
            }
        }
    }

    if config.techniques.contains(&Technique::ChainOfThought) {
        for spec in &config.tasks {
            if let Err(e) = load_cot_exemplar(&config.paths.cot_dir, &spec.id) {
                problems += 1;
                println!("  FAIL  {:<28} {}", spec.id, e);
            }
        }
    }

    let mut kinds: Vec<ProviderKind> = config.models.iter().map(|m| m.provider).collect();
    kinds.sort();
    kinds.dedup();
    for kind in kinds {
        match resolve_api_key(kind, config.providers.get(kind)) {
            Ok(_) => println!("  ok    credential for {}", kind),
            Err(e) => {
                problems += 1;
                println!("  FAIL  {}", e);
            }
        }
    }

    if problems > 0 {
        anyhow::bail!("{} problem(s) found", problems);
    }
    println!("Ready to run.");
    Ok(())
}

fn handle_report(config: &SweepConfig) -> anyhow::Result<()> {
    let records = read_records(&config.paths.results)?;
    if records.is_empty() {
        println!("No results in {}", config.paths.results.display());
        return Ok(());
    }
    print!("{}", render_table(&summarize(&records)));
    Ok(())
}

fn handle_export(config: &SweepConfig, out: &Path) -> anyhow::Result<()> {
    let records = read_records(&config.paths.results)?;
    let written = export_csv(&records, out)?;
    info!(rows = written, out = %out.display(), "Exported results");
    println!("Wrote {} rows to {}", written, out.display());
    Ok(())
}

fn handle_repair(config: &SweepConfig) -> anyhow::Result<()> {
    let report = CheckpointStore::repair(&config.paths.results, &config.paths.checkpoint)?;
    println!(
        "Checkpoint rebuilt from {} result rows ({} torn line(s) dropped, {} marker(s) added, {} orphan marker(s) removed)",
        report.rows, report.truncated_lines, report.missing_markers, report.orphan_markers
    );
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path, config: &SweepConfig) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace.join(WORKSPACE_CONFIG_FILE);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&SweepConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            println!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
    }
}
