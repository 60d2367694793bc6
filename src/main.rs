//! # butterfly-extract
//!
//! Turns an OpenStreetMap extract into a routable graph file and a turn
//! restriction file, classified by a YAML routing profile.

use std::process::ExitCode;

use anyhow::{Context, Result};
use butterfly_extract::cli::{create_progress_bar, Cli};
use butterfly_extract::config::ExtractorConfig;
use butterfly_extract::extractor::run_extraction;
use clap::Parser;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Exit status for bad arguments, configuration or profile
const EXIT_STARTUP: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            let startup = e
                .downcast_ref::<butterfly_extract::Error>()
                .is_some_and(|e| e.is_startup());
            if startup {
                ExitCode::from(EXIT_STARTUP)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let config = ExtractorConfig::discover(cli.config_path(), &cwd)?;
    let settings = cli.settings(&config);

    let progress = if cli.quiet {
        None
    } else {
        let total = std::fs::metadata(&settings.input_path)
            .map(|m| m.len())
            .unwrap_or(0);
        Some(create_progress_bar(total))
    };

    let input = settings.input_path.clone();
    let report = run_extraction(settings, progress)
        .with_context(|| format!("extraction of {} failed", input.display()))?;

    let stats = &report.prepare.stats;
    eprintln!(
        "{}: {} nodes, {} edges, {} names, {} restrictions",
        report.prepare.graph_path.display(),
        report.prepare.nodes,
        report.prepare.edges,
        report.prepare.strings,
        report.prepare.restrictions
    );
    eprintln!(
        "dropped: {} invalid ways, {} rejected ways, {} evaluation errors, {} restrictions",
        stats.ways_invalid,
        stats.ways_rejected,
        stats.evaluation_errors,
        stats.restrictions_dropped + stats.restrictions_malformed
    );
    Ok(())
}
