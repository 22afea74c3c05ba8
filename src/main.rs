//! Music Catalog CLI
//!
//! Registers music folders, rescans them and prints the resulting catalog.

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use music_catalog::config::DEFAULT_DB_FILE;
use music_catalog::{
    ContainmentMatch, DroppedFile, LibraryConfig, LibraryEngine, LibraryError, LibraryErrorKind,
    LibraryRequest, ProgressReporter,
};

const ABOUT: &str = r#"
Music Catalog - music library scanner

Examples:
  music_catalog add ~/Music                 register a folder and scan it
  music_catalog add ~/Music/Jazz --yes      accept overlapping registrations
  music_catalog scan                        rescan folders that changed
  music_catalog scan --forced               rescan every folder
  music_catalog list --json                 print the catalog as JSON
  music_catalog watch                       hourly rescans, requests on stdin
"#;

/// Music library scanner
#[derive(Parser)]
#[command(name = "music_catalog")]
#[command(author, version, about = ABOUT, long_about = None)]
#[command(help_template = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
")]
struct Cli {
    #[command(flatten)]
    options: CommonOptions,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct CommonOptions {
    /// Catalog database file
    #[arg(short = 'd', long, global = true, help = "SQLite database file")]
    db: Option<PathBuf>,

    /// Worker threads (0 = auto)
    #[arg(short = 't', long, global = true, default_value = "0", help = "Parallel workers, 0 means auto")]
    threads: usize,

    /// Directory for extracted cover art
    #[arg(long, global = true, help = "Write embedded cover art to this directory")]
    covers: Option<PathBuf>,

    /// Only offer files with these extensions to the tag reader
    #[arg(long = "ext", global = true, help = "Restrict scanning to an extension, can be repeated")]
    extensions: Vec<String>,

    /// Compare folders by path segments instead of string prefixes
    #[arg(long, global = true, help = "Treat /music and /music2 as unrelated folders")]
    segment_aware: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Register folders and scan them
    Add {
        #[arg(required = true, help = "Folders to add to the library")]
        paths: Vec<PathBuf>,

        /// Accept registrations that overlap an existing folder
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Rescan registered folders
    Scan {
        /// Rescan every folder regardless of its timestamp
        #[arg(short = 'f', long)]
        forced: bool,

        /// Print the scan report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the catalog
    List {
        #[arg(long, help = "Output as JSON")]
        json: bool,
    },
    /// Print registered folders
    Folders,
    /// Unregister a folder and drop its tracks
    Remove { path: PathBuf },
    /// Keep rescanning and read JSON requests from stdin until EOF
    Watch {
        /// Seconds between periodic rescans
        #[arg(long, default_value = "3600")]
        interval: u64,

        /// Minimum milliseconds between traversal progress lines
        #[arg(long, default_value = "100")]
        progress_interval: u64,

        /// Accept overlapping registrations without asking
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("{}", ABOUT);
        println!("Run 'music_catalog --help' for the full option list");
        return;
    };

    if let Err(e) = run(&cli.options, command) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn build_config(options: &CommonOptions, interval: Option<Duration>) -> LibraryConfig {
    let mut builder = LibraryConfig::builder()
        .db_path(options.db.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE)))
        .num_threads(options.threads)
        .segment_aware_containment(options.segment_aware);
    if let Some(covers) = &options.covers {
        builder = builder.covers_dir(covers.clone());
    }
    if !options.extensions.is_empty() {
        builder = builder.extensions(&options.extensions);
    }
    if let Some(interval) = interval {
        builder = builder.rescan_interval(interval);
    }
    builder.build()
}

/// Print a value as pretty JSON, exiting on failure
fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            error!("Failed to serialize output: {}", e);
            std::process::exit(1);
        }
    }
}

/// Ask on the terminal whether an overlapping folder should be merged
fn ask_user(conflict: &ContainmentMatch) -> bool {
    eprint!(
        "{} overlaps the registered folder {}. Merge them? [y/N] ",
        conflict.candidate.display(),
        conflict.matched.display()
    );
    let _ = std::io::stderr().flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

fn run(options: &CommonOptions, command: Commands) -> Result<(), LibraryError> {
    match command {
        Commands::Add { paths, yes } => {
            let config = build_config(options, None);
            let engine = if yes {
                LibraryEngine::open(config, |_: &ContainmentMatch| true)?
            } else {
                LibraryEngine::open(config, ask_user)?
            };

            let files: Vec<DroppedFile> = paths.into_iter().map(DroppedFile::from_path).collect();
            let added = match engine.register_folders(&files) {
                Ok(added) => added,
                Err(e) if e.kind == LibraryErrorKind::ContainmentConflict => {
                    info!("Nothing added: {}", e.message);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            if added.is_empty() {
                println!("No new folders");
                return Ok(());
            }
            for folder in &added {
                println!("Added {}", folder.path.display());
            }

            let request = music_catalog::ScanRequest::added(added);
            if let Some(result) = engine.scheduler().run_now(request) {
                let report = result?;
                println!("{} songs in library", report.library_size);
            }
        }
        Commands::Scan { forced, json } => {
            let engine = LibraryEngine::open(build_config(options, None), |_: &ContainmentMatch| false)?;
            let report = match engine.rescan_blocking(forced) {
                Some(result) => result?,
                None => return Ok(()),
            };

            if json {
                print_json(&report);
            } else {
                println!("Scan completed ({}):", report.mode);
                println!("  Folders scanned: {}", report.folders_scanned);
                println!("  Folders skipped: {}", report.folders_skipped);
                println!("  Folders failed: {}", report.folders_failed);
                println!("  Tracks updated: {}", report.tracks_upserted);
                println!("  Unreadable files: {}", report.extraction_failures);
                println!("  Tracks removed: {}", report.tracks_removed);
                println!("  Library size: {}", report.library_size);
                println!("  Errors: {}", report.error_count());
                println!("  Duration: {}ms", report.duration_ms);
            }
        }
        Commands::List { json } => {
            let engine = LibraryEngine::open(build_config(options, None), |_: &ContainmentMatch| false)?;
            let library = engine.library()?;
            if json {
                print_json(&library);
            } else {
                for entry in &library {
                    println!(
                        "{}\t{}\t{}",
                        entry.artist().unwrap_or("-"),
                        entry.title().unwrap_or("-"),
                        entry.path.display()
                    );
                }
            }
        }
        Commands::Folders => {
            let engine = LibraryEngine::open(build_config(options, None), |_: &ContainmentMatch| false)?;
            for folder in engine.folders()? {
                println!("{}\t{}", folder.last_modified, folder.path.display());
            }
        }
        Commands::Remove { path } => {
            let engine = LibraryEngine::open(build_config(options, None), |_: &ContainmentMatch| false)?;
            let path = path.canonicalize().unwrap_or(path);
            if engine.remove_folder(&path)? {
                println!("Removed {}", path.display());
            } else {
                println!("{} is not registered", path.display());
            }
        }
        Commands::Watch {
            interval,
            progress_interval,
            yes,
        } => {
            let config = build_config(options, Some(Duration::from_secs(interval.max(1))));
            let engine = LibraryEngine::open(config, move |_: &ContainmentMatch| yes)?;

            let events = engine.subscribe();
            std::thread::Builder::new()
                .name("progress-reporter".to_string())
                .spawn(move || ProgressReporter::new(true, progress_interval).run(events))
                .map_err(|e| LibraryError::worker(e.to_string()))?;

            engine.app_ready()?;
            engine.rescan(false);
            let timer = engine.start_timer()?;
            info!(
                "Rescanning every {}s, reading requests from stdin",
                engine.scheduler().interval().as_secs()
            );

            for line in std::io::stdin().lock().lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LibraryRequest>(&line) {
                    Ok(request) => {
                        if let Err(e) = engine.handle(request) {
                            error!("Request failed: {}", e);
                        }
                    }
                    Err(e) => error!("Invalid request: {}", e),
                }
            }

            info!("Input closed, stopping");
            timer.stop();
            info!(
                "{} scans completed, {} failed",
                engine.scheduler().completed_jobs(),
                engine.scheduler().failed_jobs()
            );
        }
    }
    Ok(())
}
