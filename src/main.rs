//! CLI entry point for the harvester tool.

use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result, bail};
use clap::Parser;
use harvester_core::{
    EntitySpec, FsCheckpointStore, HarvestConfig, HarvestSummary, Harvester, RunMode, RunState,
    default_entities, entity_status, load_entities_file,
};
use tracing::{debug, info, warn};

mod cli;

use cli::{Cli, Command, HarvestArgs, StatusArgs};

/// Exit code when some work remains for a rerun.
const EXIT_PARTIAL: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // .env first so its values reach clap's env fallbacks
    let dotenv = dotenvy::dotenv();
    // Parse CLI arguments before tracing, so --help works without logs
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match dotenv {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "ignoring unreadable .env"),
    }
    debug!(?cli, "CLI arguments parsed");

    let mut config = HarvestConfig::from_env().context("invalid HARVEST_* configuration")?;
    cli.apply(&mut config);
    let entities = select_entities(&cli)?;

    match &cli.command {
        Command::Harvest(args) => run_harvest(config, &entities, args, cli.quiet).await,
        Command::Status(args) => run_status(&config, &entities, args).await,
    }
}

fn select_entities(cli: &Cli) -> Result<Vec<EntitySpec>> {
    let all = match &cli.entities {
        Some(path) => load_entities_file(path)
            .with_context(|| format!("loading entities from {}", path.display()))?,
        None => default_entities(),
    };
    if cli.only.is_empty() {
        return Ok(all);
    }

    for name in &cli.only {
        if !all.iter().any(|e| &e.name == name) {
            let known: Vec<&str> = all.iter().map(|e| e.name.as_str()).collect();
            bail!("unknown entity {name:?} (known: {})", known.join(", "));
        }
    }
    Ok(all
        .into_iter()
        .filter(|e| cli.only.contains(&e.name))
        .collect())
}

async fn run_harvest(
    mut config: HarvestConfig,
    entities: &[EntitySpec],
    args: &HarvestArgs,
    quiet: bool,
) -> Result<ExitCode> {
    args.apply(&mut config)?;
    config.show_progress &= !quiet;

    let mode = if args.sequential {
        RunMode::Sequential
    } else {
        RunMode::Concurrent
    };
    let harvester = Harvester::from_config(config)
        .context("failed to set up harvester")?
        .with_mode(mode)
        .with_skip_crawl(args.skip_crawl);

    let interrupt = harvester.interrupt_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight requests");
            interrupt.store(true, Ordering::SeqCst);
        }
    });

    info!(
        entities = entities.len(),
        data_dir = %harvester.config().data_dir.display(),
        "harvester starting"
    );
    let summary = harvester.run(entities).await;
    ctrl_c.abort();

    print_summary(&summary);
    Ok(exit_code(summary.state()))
}

async fn run_status(
    config: &HarvestConfig,
    entities: &[EntitySpec],
    args: &StatusArgs,
) -> Result<ExitCode> {
    let store = FsCheckpointStore::new(&config.data_dir);
    let mut statuses = Vec::with_capacity(entities.len());
    for entity in entities {
        let status = entity_status(&store, entity, config.min_id)
            .await
            .with_context(|| format!("reading status of {}", entity.name))?;
        statuses.push(status);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{:<16} {:>6} {:>9} {:>9} {:>9} {:>9} {:>8}",
        "entity", "pages", "listed", "unique", "stored", "remaining", "done"
    );
    for s in &statuses {
        println!(
            "{:<16} {:>6} {:>9} {:>9} {:>9} {:>9} {:>7.1}%",
            s.entity, s.pages, s.listed, s.unique, s.stored, s.remaining, s.completion_percent
        );
        if s.skipped_pages > 0 {
            println!("  unreadable page files skipped: {}", s.skipped_pages);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &HarvestSummary) {
    println!(
        "{:<16} {:>6} {:>9} {:>11} {:>8} {:>9} {:>7} {:>9} {:>9}  state",
        "entity", "pages", "listed", "outstanding", "stored", "not_found", "invalid", "transient",
        "permanent"
    );
    for report in &summary.entities {
        let pages = report
            .crawl
            .as_ref()
            .map_or_else(|| "-".to_string(), |c| c.pages.to_string());
        let f = &report.fetch;
        println!(
            "{:<16} {:>6} {:>9} {:>11} {:>8} {:>9} {:>7} {:>9} {:>9}  {}",
            report.entity,
            pages,
            report.reconciliation.listed,
            report.outstanding(),
            f.stored,
            f.not_found,
            f.invalid,
            f.transient,
            f.permanent,
            report.state()
        );
        if let Some(error) = &report.error {
            println!("  error: {error}");
        }
        if let Some(reason) = report.crawl.as_ref().and_then(|c| c.halted.as_ref()) {
            println!("  listing halted: {reason}");
        }
        if report.skipped_pages > 0 {
            println!("  unreadable page files skipped: {}", report.skipped_pages);
        }
    }
    let totals = summary.totals();
    println!(
        "total: {} stored, {} failed, {} retries in {:.1}s ({})",
        totals.stored,
        totals.failed(),
        totals.retried,
        summary.elapsed.as_secs_f64(),
        summary.state()
    );
}

fn exit_code(state: RunState) -> ExitCode {
    match state {
        RunState::Complete => ExitCode::SUCCESS,
        RunState::Partial => ExitCode::from(EXIT_PARTIAL),
        RunState::Blocked => ExitCode::FAILURE,
    }
}
