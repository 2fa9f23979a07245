//! gsp - unattended game update downloader and patcher
//!
//! Downloads update archives for an installed game and patches the
//! installation in place while the next archive is still downloading.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gsp::app::{RunOutcome, Updater};
use gsp::config::{read_args_file, Config};
use gsp::game::catalog::DEFAULT_API_URL;
use gsp::game::Component;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gsp")]
#[command(version)]
#[command(about = "Unattended game update downloader and patcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read additional arguments from a file, one per line
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to gsp.log in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Args)]
struct GameArgs {
    /// Game installation directory (contains config.ini)
    #[arg(short, long)]
    game_path: PathBuf,

    /// Saved API response to use instead of querying the launcher API
    #[arg(long)]
    api_file: Option<PathBuf>,

    /// Launcher resource API endpoint
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Only consider the pre-download release
    #[arg(long)]
    predownload_only: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and apply the update (or a full install)
    Run {
        #[command(flatten)]
        game: GameArgs,

        /// Scratch directory for diff patching (default: <game>/gsp_temp)
        #[arg(short, long)]
        temp_path: Option<PathBuf>,

        /// Directory for downloaded packages (default: <game>/gsp_patch)
        #[arg(short, long)]
        patch_path: Option<PathBuf>,

        /// hpatchz executable or the directory containing it
        #[arg(long)]
        hpatchz_path: Option<PathBuf>,

        /// Download only, do not patch
        #[arg(long)]
        download_only: bool,

        /// Language packs to install (code or name, e.g. en-us)
        #[arg(short, long, num_args = 1..)]
        language: Vec<Component>,

        /// Components to skip for this run (neither downloaded nor patched)
        #[arg(long, num_args = 1..)]
        download_exclude: Vec<Component>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show installed version, catalog and what a run would download
    Info {
        #[command(flatten)]
        game: GameArgs,
    },

    /// Delete files no installed manifest lists
    Purge {
        /// Game installation directory
        #[arg(short, long)]
        game_path: PathBuf,

        /// Only list what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

impl GameArgs {
    fn into_config(self) -> Config {
        let mut config = Config::new(self.game_path);
        config.api_file = self.api_file;
        config.api_url = self.api_url;
        config.predownload_only = self.predownload_only;
        config
    }
}

/// Command line with the contents of `--config <file>` appended.
fn collect_args() -> Result<Vec<String>> {
    let mut args: Vec<String> = std::env::args().collect();
    let mut file = None;
    for (i, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix("--config=") {
            file = Some(PathBuf::from(value));
        } else if arg == "--config" {
            file = args.get(i + 1).map(PathBuf::from);
        }
    }
    if let Some(file) = file {
        args.extend(read_args_file(&file)?);
    }
    Ok(args)
}

fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = if verbose {
        EnvFilter::new("gsp=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gsp=info"))
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, "gsp.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_from(collect_args()?);
    let _guard = init_logging(cli.verbose, cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Run {
            game,
            temp_path,
            patch_path,
            hpatchz_path,
            download_only,
            language,
            download_exclude,
            yes,
        } => {
            let mut config = game.into_config();
            if let Some(temp_path) = temp_path {
                config.temp_path = temp_path;
            }
            if let Some(patch_path) = patch_path {
                config.patch_path = patch_path;
            }
            config.hpatchz_path = hpatchz_path;
            config.download_only = download_only;
            config.languages = language.into_iter().collect();
            config.download_exclude = download_exclude.into_iter().collect();
            config.log_dir = cli.log_dir;
            config.assume_yes = yes;

            println!("gsp - game update downloader and patcher");
            println!("Game:       {}", config.game_path.display());
            println!("Packages:   {}", config.patch_path.display());
            println!();

            let updater = Updater::new(config)?;
            match updater.run().await? {
                RunOutcome::UpToDate(version) => {
                    println!("Game is already up to date ({})", version);
                }
                RunOutcome::Aborted => {}
                RunOutcome::Finished {
                    version,
                    report,
                    download_only,
                    ..
                } => {
                    println!("\n=== Summary ===");
                    println!(
                        "Components: {} processed, {} skipped",
                        report.processed, report.skipped
                    );
                    if download_only {
                        println!("\nDownloads for {} complete.", version);
                    } else {
                        println!("\nGame updated to {}.", version);
                    }
                }
            }
        }

        Commands::Info { game } => {
            let updater = Updater::new(game.into_config())?;
            updater.info().await?;
        }

        Commands::Purge { game_path, dry_run } => {
            let updater = Updater::new(Config::new(game_path))?;
            let report = updater.purge(dry_run)?;

            for path in &report.extra {
                println!("{}", path.display());
            }
            let verb = if dry_run { "would be deleted" } else { "deleted" };
            eprintln!(
                "\n{} files {}, {} empty directories removed, {} listed files missing",
                report.extra.len(),
                verb,
                report.removed_dirs,
                report.missing.len()
            );
        }
    }

    Ok(())
}
