// ABOUTME: Entry point for the pagesnap binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and runs snapshot batches against the database.

mod config;

use std::collections::BTreeMap;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pagesnap_core::Site;
use pagesnap_store::{
    BatchReport, CancelToken, Database, SiteStore, SnapshotProcessor, find_active,
};
use ulid::Ulid;

use crate::config::PagesnapConfig;

#[derive(Debug, Parser)]
#[command(name = "pagesnap", version, about = "Publish and prune CMS page snapshots")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List known sites.
    Sites,

    /// Capture and activate a new snapshot of every page of the given sites.
    CreateSnapshots {
        /// Site ids, or `all`.
        #[arg(long = "site", required = true, num_args = 1..)]
        sites: Vec<String>,
    },

    /// Delete all but the most relevant snapshots of every page of the given sites.
    CleanupSnapshots {
        /// Site ids, or `all`.
        #[arg(long = "site", required = true, num_args = 1..)]
        sites: Vec<String>,

        /// Snapshots to keep per page; defaults to PAGESNAP_KEEP_SNAPSHOTS.
        #[arg(long, allow_negative_numbers = true)]
        keep_snapshots: Option<i64>,
    },

    /// Print the snapshot active right now for the given criteria.
    Lookup {
        /// Criteria as key=value, e.g. `url=/about` or `site=<ID>`.
        #[arg(long = "criteria", required = true, value_parser = parse_pair)]
        criteria: Vec<(String, String)>,
    },
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pagesnap=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PagesnapConfig::from_env()?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current page");
            on_interrupt.cancel();
        }
    });

    tokio::task::spawn_blocking(move || run(cli.command, &config, &cancel)).await?
}

fn run(command: Command, config: &PagesnapConfig, cancel: &CancelToken) -> anyhow::Result<()> {
    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let db = Database::open_with_timeout(&config.db_path, config.busy_timeout)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    tracing::debug!("using database {}", config.db_path.display());

    match command {
        Command::Sites => {
            for site in db.find_sites(None)? {
                let state = if site.enabled { "enabled" } else { "disabled" };
                println!("{}\t{}\t{}\t{}", site.site_id, site.host, site.name, state);
            }
            Ok(())
        }
        Command::CreateSnapshots { sites } => {
            let sites = resolve_sites(&db, &sites)?;
            let mut processor = SnapshotProcessor::new(db);
            let mut failed = 0;
            for site in sites {
                if cancel.is_cancelled() {
                    break;
                }
                let report = processor.create_snapshots(&site.site_id, cancel)?;
                failed += summarize("created snapshots", &site, &report);
            }
            finish(failed)
        }
        Command::CleanupSnapshots {
            sites,
            keep_snapshots,
        } => {
            let keep = keep_snapshots.unwrap_or(config.keep_snapshots);
            pagesnap_store::keep_count(keep)?;

            let sites = resolve_sites(&db, &sites)?;
            let mut processor = SnapshotProcessor::new(db);
            let mut failed = 0;
            for site in sites {
                if cancel.is_cancelled() {
                    break;
                }
                let report = processor.cleanup_snapshots(&site.site_id, keep, cancel)?;
                failed += summarize("cleaned up snapshots", &site, &report);
            }
            finish(failed)
        }
        Command::Lookup { criteria } => {
            let criteria: BTreeMap<String, String> = criteria.into_iter().collect();
            match find_active(&db, &criteria, chrono::Utc::now())? {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                None => anyhow::bail!("no active snapshot matches {:?}", criteria),
            }
            Ok(())
        }
    }
}

/// Expand `all` or a list of site ids into sites, failing on unknown ids.
fn resolve_sites(db: &Database, args: &[String]) -> anyhow::Result<Vec<Site>> {
    if args.iter().any(|a| a == "all") {
        return Ok(db.find_sites(None)?);
    }

    let ids = args
        .iter()
        .map(|a| Ulid::from_string(a).with_context(|| format!("invalid site id `{a}`")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let sites = db.find_sites(Some(&ids))?;

    if let Some(missing) = ids.iter().find(|id| !sites.iter().any(|s| s.site_id == **id)) {
        anyhow::bail!("site not found: {missing}");
    }
    Ok(sites)
}

fn summarize(action: &str, site: &Site, report: &BatchReport) -> usize {
    println!(
        "{} for site {} ({}): {} ok, {} failed, {} skipped",
        action,
        site.name,
        site.site_id,
        report.succeeded.len(),
        report.failed.len(),
        report.skipped.len()
    );
    for (page_id, err) in &report.failed {
        println!("  page {page_id}: {err}");
    }
    report.failed.len()
}

fn finish(failed: usize) -> anyhow::Result<()> {
    if failed > 0 {
        anyhow::bail!("{failed} page(s) failed");
    }
    Ok(())
}
