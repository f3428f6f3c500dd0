//! Static RLS analyzer CLI.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use rlsguard_engine::config::ProjectConfig;
use rlsguard_engine::engine::AnalysisEngine;
use rlsguard_engine::reporter::{self, OutputFormat};

#[derive(Parser)]
#[command(name = "analyze")]
#[command(about = "Lint SQL migrations for row level security, naming, constraints and indexes")]
#[command(version)]
struct Cli {
    /// SQL files or directories of migrations
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Also write the report to this file (the terminal still gets text)
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Output format (text, markdown, json, sarif)
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Config file (defaults to rlsguard.toml or .rlsguard.yaml next to the input)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fold all files into one schema before checking
    #[arg(long)]
    merge: bool,

    /// Only run these rule IDs or prefixes (comma-separated)
    #[arg(long)]
    select: Option<String>,

    /// Skip these rule IDs or prefixes (comma-separated)
    #[arg(long)]
    exclude_rules: Option<String>,

    /// Exit non-zero on warnings
    #[arg(long)]
    fail_on_warnings: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Directory config files are looked up in.
fn config_root(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }
}

fn run(cli: &Cli) -> Result<u8> {
    if let Some(missing) = cli.paths.iter().find(|p| !p.exists()) {
        anyhow::bail!("{} does not exist", missing.display());
    }

    let project = ProjectConfig::load(cli.config.as_deref(), &config_root(&cli.paths[0]))
        .context("failed to load configuration")?;
    let mut config = project.check;
    if cli.merge {
        config.merge = true;
    }
    if cli.fail_on_warnings {
        config.fail_on_warnings = true;
    }
    if let Some(ref select) = cli.select {
        config.select = Some(select.clone());
    }
    if let Some(ref exclude) = cli.exclude_rules {
        config.exclude_rules = Some(exclude.clone());
    }
    let fail_on_warnings = config.fail_on_warnings;

    let engine = AnalysisEngine::new(config);
    let report = engine.analyze_all(&cli.paths).context("analysis failed")?;
    tracing::info!(
        "{} file(s): {} error(s), {} warning(s), {} info",
        report.sources.len(),
        report.errors,
        report.warnings,
        report.infos
    );

    reporter::publish(&report, cli.format, cli.report.as_deref(), &mut std::io::stdout().lock())?;

    Ok(u8::from(report.exit_code(fail_on_warnings) != 0))
}
