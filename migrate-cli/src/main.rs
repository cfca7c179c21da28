use std::{path::PathBuf, process};

use anyhow::{Context, Result};
use clap::Parser;
use migrate::{
    config::MigrationConfig,
    folder::{load_exclusions, load_renames, FolderResolver},
    imap::ImapClientBuilder,
    migration::{report::EXIT_ABORTED, MigrationEvent},
    retry::RetryPolicy,
    Migrator, ProgressStore,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[clap(
        short,
        long,
        env = "IMAP_MIGRATE_CONFIG",
        default_value = "imap-migrate.toml"
    )]
    config: PathBuf,

    /// File listing source folders to exclude, one per line
    #[clap(short, long)]
    exclude_file: Option<PathBuf>,

    /// TOML or JSON file mapping source folders to destination folders
    #[clap(short, long)]
    mapping_file: Option<PathBuf>,

    /// List what would be migrated without writing anything
    #[clap(long)]
    dry_run: bool,

    /// Enable debug logs
    #[clap(short, long)]
    verbose: bool,
}

fn tracer(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,migrate=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    tracer(args.verbose);

    let code = match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            EXIT_ABORTED
        }
    };

    process::exit(code)
}

async fn run(args: Args) -> Result<i32> {
    let config = MigrationConfig::from_path(&args.config)
        .with_context(|| format!("cannot load configuration from {:?}", args.config))?;
    debug!("loaded configuration from {:?}", args.config);

    let mut resolver = FolderResolver::from_config(&config.folders)?;

    if let Some(path) = args.exclude_file.as_ref() {
        resolver.add_exclusions(load_exclusions(path)?);
    }

    if let Some(path) = args.mapping_file.as_ref() {
        resolver.add_renames(load_renames(path)?);
    }

    resolver.validate()?;

    let store = ProgressStore::open(&config.store.path)?;

    let migrator = Migrator::new(
        ImapClientBuilder::new(config.source),
        ImapClientBuilder::new(config.destination),
        store,
    )
    .with_resolver(resolver)
    .with_retry_policy(RetryPolicy::from(&config.retry))
    .with_options(&config.migration)
    .with_dry_run(args.dry_run)
    .with_handler(|evt| async move {
        match evt {
            MigrationEvent::StartedFolder(_)
            | MigrationEvent::CompletedFolder(_)
            | MigrationEvent::FailedMessage(..)
            | MigrationEvent::Reconnecting(..) => eprintln!("{evt}"),
            _ => (),
        }
        migrate::Result::Ok(())
    });

    let cancel = migrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current message");
            cancel.cancel();
        }
    });

    let report = migrator.run().await;
    println!("{report}");

    Ok(report.exit_code())
}
