//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use harvester_core::HarvestConfig;

/// Resumable harvester for paginated listing and object endpoints.
///
/// Walks each entity's listing, works out which objects are still missing
/// from the data directory, and fetches them under adaptive concurrency.
/// Settings come from `HARVEST_*` variables (a `.env` file is read first);
/// flags override them.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Data directory holding pages/ and objects/
    #[arg(short = 'd', long, global = true, env = "HARVEST_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// JSON file with an array of entity definitions
    #[arg(short = 'e', long, global = true)]
    pub entities: Option<PathBuf>,

    /// Only process the named entities (repeatable)
    #[arg(long = "entity", global = true)]
    pub only: Vec<String>,

    /// Only count identifiers at or above this value
    #[arg(long, global = true, env = "HARVEST_MIN_ID")]
    pub min_id: Option<i64>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl listings and fetch every missing object
    Harvest(HarvestArgs),
    /// Show per-entity completion from the data directory
    Status(StatusArgs),
}

/// Options for `harvest`.
#[derive(Args, Debug)]
pub struct HarvestArgs {
    /// Process entities one after another instead of all at once
    #[arg(long)]
    pub sequential: bool,

    /// Skip the listing walk and use persisted pages only
    #[arg(long)]
    pub skip_crawl: bool,

    /// Base concurrent object requests per entity
    #[arg(
        short = 'c',
        long,
        env = "HARVEST_MAX_CONCURRENT_OBJECTS",
        value_parser = clap::value_parser!(u64).range(1..=1000)
    )]
    pub concurrency: Option<u64>,

    /// Concurrent listing requests per entity
    #[arg(
        long,
        env = "HARVEST_MAX_CONCURRENT_PAGES",
        value_parser = clap::value_parser!(u64).range(1..=16)
    )]
    pub page_concurrency: Option<u64>,

    /// Requests per second at full speed (0 disables the base delay)
    #[arg(short = 'r', long, env = "HARVEST_REQUESTS_PER_SECOND")]
    pub rate: Option<u32>,

    /// Identifiers dispatched per chunk
    #[arg(long, env = "HARVEST_BATCH_SIZE", value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: Option<u64>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl Cli {
    /// Applies the global options to `config`.
    pub fn apply(&self, config: &mut HarvestConfig) {
        if let Some(data_dir) = &self.data_dir {
            config.data_dir.clone_from(data_dir);
        }
        if self.min_id.is_some() {
            config.min_id = self.min_id;
        }
    }
}

impl HarvestArgs {
    /// Applies the harvest options to `config`.
    ///
    /// # Errors
    ///
    /// Fails when a count does not fit the platform's `usize`.
    pub fn apply(&self, config: &mut HarvestConfig) -> Result<(), std::num::TryFromIntError> {
        if let Some(concurrency) = self.concurrency {
            config.max_concurrent_objects = usize::try_from(concurrency)?;
        }
        if let Some(page_concurrency) = self.page_concurrency {
            config.max_concurrent_pages = usize::try_from(page_concurrency)?;
        }
        if let Some(rate) = self.rate {
            config.requests_per_second = rate;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = usize::try_from(batch_size)?;
        }
        config.show_progress = !self.no_progress;
        Ok(())
    }
}

/// Options for `status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_harvest_defaults() {
        let cli = Cli::try_parse_from(["harvester", "harvest"]).unwrap();
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
        let Command::Harvest(args) = cli.command else {
            panic!("expected harvest");
        };
        assert!(!args.sequential);
        assert!(!args.skip_crawl);
        assert!(args.concurrency.is_none());
    }

    #[test]
    fn test_cli_harvest_flags() {
        let cli = Cli::try_parse_from([
            "harvester",
            "harvest",
            "--sequential",
            "--skip-crawl",
            "-c",
            "120",
            "--rate",
            "4",
            "--entity",
            "Plan",
            "--entity",
            "_Lot",
            "--min-id",
            "38901",
        ])
        .unwrap();
        assert_eq!(cli.only, vec!["Plan", "_Lot"]);
        assert_eq!(cli.min_id, Some(38901));
        let Command::Harvest(args) = cli.command else {
            panic!("expected harvest");
        };
        assert!(args.sequential);
        assert!(args.skip_crawl);
        assert_eq!(args.concurrency, Some(120));
        assert_eq!(args.rate, Some(4));
    }

    #[test]
    fn test_cli_global_flags_before_subcommand() {
        let cli = Cli::try_parse_from(["harvester", "-vv", "-d", "/tmp/raw", "status", "--json"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/raw")));
        assert!(matches!(cli.command, Command::Status(StatusArgs { json: true })));
    }

    #[test]
    fn test_cli_concurrency_zero_rejected() {
        let err = Cli::try_parse_from(["harvester", "harvest", "-c", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["harvester"]).is_err());
    }

    #[test]
    fn test_harvest_args_apply_overrides() {
        let cli = Cli::try_parse_from([
            "harvester",
            "-d",
            "/srv/raw",
            "--min-id",
            "7",
            "harvest",
            "-c",
            "12",
            "--page-concurrency",
            "3",
            "--batch-size",
            "40",
            "--no-progress",
        ])
        .unwrap();
        let mut config = HarvestConfig {
            show_progress: true,
            ..HarvestConfig::default()
        };
        cli.apply(&mut config);
        let Command::Harvest(args) = &cli.command else {
            panic!("expected harvest");
        };
        args.apply(&mut config).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/raw"));
        assert_eq!(config.min_id, Some(7));
        assert_eq!(config.max_concurrent_objects, 12);
        assert_eq!(config.max_concurrent_pages, 3);
        assert_eq!(config.batch_size, 40);
        assert!(!config.show_progress);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Cli::try_parse_from(["harvester", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
