use std::path::Path;
use std::process::ExitCode;

use clap::Parser;

use arca_core::commands::{backup, restore};
use arca_core::config::Config;

#[derive(Parser)]
#[command(
    name = "arca",
    version,
    about = "Incremental content-addressed directory backup to an object store",
    after_help = "\
Examples:
  arca -s                                   back up the configured tree
  arca -r -t 2026-08-02T12_00_00.123456789Z -p /restore/here
  arca -s -c nas                            use nas.yaml instead of config.yaml"
)]
struct Cli {
    /// Back up the configured directory tree (full sync)
    #[arg(short = 's', long = "sync")]
    sync: bool,

    /// Restore files from a previously uploaded manifest
    #[arg(short = 'r', long = "restore")]
    restore: bool,

    /// Manifest timestamp to restore (as printed by a backup run)
    #[arg(short = 't', long = "timestamp")]
    timestamp: Option<String>,

    /// Destination directory for restored files
    #[arg(short = 'p', long = "path")]
    path: Option<String>,

    /// Config file name without extension (default: config)
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(clean) if clean => ExitCode::SUCCESS,
        Ok(_) => {
            eprintln!("[Error] completed with per-file errors; see log above");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("[Error] {e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(true)` on a clean run, `Ok(false)` on a partial one.
fn run(cli: &Cli) -> Result<bool, Box<dyn std::error::Error>> {
    if cli.sync == cli.restore {
        return Err("pass exactly one of -s (sync) or -r (restore); see --help".into());
    }

    let config = Config::load(cli.config.as_deref())?;

    if cli.sync {
        let outcome = backup::run(&config)?;
        let stats = &outcome.stats;
        println!(
            "Backup complete: {} files indexed ({} cache hits), {} chunks uploaded ({})",
            stats.files_indexed,
            stats.cache_hits,
            stats.chunks_uploaded,
            format_bytes(stats.bytes_uploaded),
        );
        println!("Manifest: {}", outcome.manifest_key);
        if outcome.is_partial {
            println!(
                "  Skipped: {} unreadable files, {} failed uploads",
                stats.index_errors, stats.upload_errors,
            );
        }
        Ok(!outcome.is_partial)
    } else {
        let timestamp = cli
            .timestamp
            .as_deref()
            .ok_or("-t <timestamp> is required with -r")?;
        let dest = cli.path.as_deref().ok_or("-p <path> is required with -r")?;

        let stats = restore::run(&config, timestamp, Path::new(dest))?;
        println!(
            "Restore complete: {} files ({}), {} skipped as existing, {} errors",
            stats.files_restored,
            format_bytes(stats.bytes_restored),
            stats.skipped_existing,
            stats.errors,
        );
        Ok(!stats.is_partial())
    }
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
