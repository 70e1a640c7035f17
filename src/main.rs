mod anilist;
mod cache;
mod config;
mod config_persistence;
mod credentials;
mod error;
mod id_cleaner;
mod kenmei_import;
mod protocol;
mod reconciliation;
mod reports;
mod search_engine;
mod sync_manager;
mod title_matcher;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::{Args, Parser, Subcommand};
use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use anilist::client::AniListClient;
use anilist::gateway::ApiGateway;
use config::SyncSettings;
use error::SyncError;
use protocol::{SyncMessage, SyncSummary};
use sync_manager::SyncManager;

const BUS_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(
    name = "mangasync",
    version,
    about = "Sync manga reading progress from a CSV export to AniList"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Push progress from an export to the AniList manga list
    Sync(SyncArgs),

    /// Manage the stored AniList access token
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },

    /// Manage the lookup caches
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Args)]
struct SyncArgs {
    /// Reading-history CSV export
    #[arg(long, value_name = "PATH")]
    csv: PathBuf,

    /// Previous export; titles unchanged since then are skipped
    #[arg(long, value_name = "PATH")]
    previous_csv: Option<PathBuf>,

    /// Compute and log updates without sending them
    #[arg(long)]
    dry_run: bool,

    /// Access token for this run only
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Store a token in the system keyring
    Set { token: String },
    /// Remove the stored token
    Clear,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Delete cached lookups (both caches when no flag is given)
    Clear {
        #[arg(long)]
        search: bool,
        #[arg(long)]
        format: bool,
    },
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn load_config(config_file: Option<PathBuf>) -> Result<config::Config, SyncError> {
    let config_file = match config_file {
        Some(path) => path,
        None => config_persistence::default_config_file()?,
    };
    debug!("Using config file {}", config_file.display());
    config_persistence::load_or_create_config(&config_file)
}

/// Sets `stop_requested` on the first Ctrl-C. Running requests and sleeps finish normally.
fn spawn_stop_listener(stop_requested: Arc<AtomicBool>) {
    let spawned = thread::Builder::new()
        .name("signal-listener".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!("Ctrl-C handling unavailable: {}", err);
                    return;
                }
            };
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        warn!("Received Ctrl-C, stopping after the current title");
                        stop_requested.store(true, Ordering::Relaxed);
                    }
                    Err(err) => warn!("Failed to listen for Ctrl-C: {}", err),
                }
            });
        });
    if let Err(err) = spawned {
        warn!("Failed to spawn signal listener: {}", err);
    }
}

fn print_summary(summary: &SyncSummary) {
    println!();
    if summary.stopped {
        println!("Sync stopped early.");
    }
    println!("Titles processed:  {}", summary.titles_total);
    println!("Updated:           {}", summary.updated);
    println!("Unchanged:         {}", summary.unchanged);
    println!("Completed skipped: {}", summary.completed_skipped);
    println!("Failed:            {}", summary.failed);
    println!("Not found:         {}", summary.not_found);
    println!("Multiple IDs:      {}", summary.multiple_ids);
    println!("Chapters updated:  {}", summary.chapters_updated);
}

fn run_sync(args: SyncArgs, config_file: Option<PathBuf>) -> Result<(), SyncError> {
    let config = load_config(config_file)?;
    let access_token = credentials::resolve_access_token(args.token)?;
    let settings = SyncSettings::from_config(
        &config,
        access_token,
        config_persistence::resolve_cache_dir(&config)?,
        config_persistence::resolve_report_dir(&config)?,
        args.dry_run,
    );
    let entries = kenmei_import::load_local_entries(&args.csv, args.previous_csv.as_deref())?;
    if settings.dry_run {
        info!("Dry run: no AniList entries will be modified");
    }

    let (bus_sender, _) = broadcast::channel(BUS_CAPACITY);
    let mut bus_receiver = bus_sender.subscribe();
    let stop_requested = Arc::new(AtomicBool::new(false));
    spawn_stop_listener(Arc::clone(&stop_requested));

    let worker = thread::Builder::new()
        .name("sync-worker".to_string())
        .spawn(move || {
            let gateway = ApiGateway::from_settings(&settings);
            let sleeper = gateway.sleeper();
            let catalog = AniListClient::new(gateway, settings.list_chunk_size);
            let mut manager = SyncManager::new(
                settings,
                Box::new(catalog),
                sleeper,
                bus_sender,
                stop_requested,
            );
            manager.run(entries)
        })?;

    loop {
        match bus_receiver.blocking_recv() {
            Ok(SyncMessage::PhaseChanged(phase)) => println!("==> {}", phase.label()),
            Ok(SyncMessage::Progress { done, total }) => debug!("Progress {done}/{total}"),
            Ok(SyncMessage::Log(line)) => println!("{line}"),
            Ok(SyncMessage::Finished(summary)) => {
                print_summary(&summary);
                break;
            }
            Ok(SyncMessage::Failed(reason)) => {
                debug!("Sync worker reported failure: {reason}");
                break;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Front end lagged behind the sync worker; skipped {skipped} message(s)");
            }
            Err(RecvError::Closed) => break,
        }
    }

    match worker.join() {
        Ok(result) => result.map(|_| ()),
        Err(payload) => Err(SyncError::WorkerPanicked(panic_payload_to_string(
            payload.as_ref(),
        ))),
    }
}

fn run_token_command(command: TokenCommand) -> Result<(), SyncError> {
    match command {
        TokenCommand::Set { token } => {
            credentials::set_access_token(&token)?;
            info!("AniList access token saved to the system keyring");
        }
        TokenCommand::Clear => {
            credentials::clear_access_token()?;
            info!("AniList access token removed from the system keyring");
        }
    }
    Ok(())
}

fn run_cache_command(command: CacheCommand, config_file: Option<PathBuf>) -> Result<(), SyncError> {
    let CacheCommand::Clear { search, format } = command;
    let config = load_config(config_file)?;
    let cache_dir = config_persistence::resolve_cache_dir(&config)?;
    let clear_all = !search && !format;
    if search || clear_all {
        let mut cache = cache::open_search_cache(&cache_dir);
        let cleared = cache.len();
        cache.clear()?;
        info!(
            "Cleared {} search cache entries from {}",
            cleared,
            cache.path().display()
        );
    }
    if format || clear_all {
        let mut cache = cache::open_format_cache(&cache_dir);
        let cleared = cache.len();
        cache.clear()?;
        info!(
            "Cleared {} format cache entries from {}",
            cleared,
            cache.path().display()
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let result = match cli.command {
        Command::Sync(args) => run_sync(args, cli.config),
        Command::Token { command } => run_token_command(command),
        Command::Cache { command } => run_cache_command(command, cli.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
