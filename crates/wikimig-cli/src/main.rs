#![forbid(unsafe_code)]

use anyhow::Context;
use clap::Parser;
use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use wikimig_core::auth::resolve_credentials;
use wikimig_core::cancel::CancelToken;
use wikimig_core::config::{self, MigrationConfig};
use wikimig_core::convert::PandocConverter;
use wikimig_core::jira::JiraClient;
use wikimig_core::orchestrator::RunOptions;
use wikimig_core::run::{self, RunReport};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "wikimig: convert HTML issue fields and comments to wiki markup",
    long_about = None,
    after_help = "EXAMPLES:\n    # Migrate every configured project\n    wikimig --config wikimig.toml\n\n    # Preview a single project without writing anything\n    wikimig --project DEMO --dry-run\n\n    # Emit the run report as JSON\n    wikimig --json"
)]
struct Cli {
    /// Config file. Defaults to ./wikimig.toml, then the user config dir.
    /// Files ending in `.json` are read as JSON.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log file, opened in append mode.
    #[arg(long, value_name = "PATH", default_value = "wikimig.log")]
    log_file: PathBuf,

    /// Project key to migrate instead of the configured list (repeatable).
    #[arg(short, long = "project", value_name = "KEY")]
    projects: Vec<String>,

    /// Number of issues processed concurrently.
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Issues fetched per search request.
    #[arg(long, value_name = "N")]
    page_size: Option<usize>,

    /// Convert and log, but write nothing back and leave notifications alone.
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON instead of the summary line.
    #[arg(long)]
    json: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply_overrides(&self, config: &mut MigrationConfig) {
        if !self.projects.is_empty() {
            config.projects.clone_from(&self.projects);
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
    }
}

fn init_tracing(log_file: &Path, verbose: bool) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    let filter = EnvFilter::try_from_env("WIKIMIG_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "wikimig=debug,info"
        } else {
            "wikimig=info,warn"
        })
    });

    let format = env::var("WIKIMIG_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);
    let writer = Mutex::new(file);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_writer(writer).with_ansi(false))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(writer).with_ansi(false))
                .init();
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<MigrationConfig> {
    let working_dir = env::current_dir()?;
    let path = config::resolve_config_path(cli.config.as_deref(), &working_dir);
    let mut config = config::load_config(&path)?;
    cli.apply_overrides(&mut config);
    config.validate().context("invalid command-line overrides")?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Cancel the run on the first Ctrl-C. Later presses only log, the run is
/// already winding down and restoring notifications.
fn watch_interrupts(cancel: CancelToken) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start signal runtime")?;

    thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        error!("Cannot listen for Ctrl-C: {err}");
                        return;
                    }
                    if cancel.cancel() {
                        info!(
                            "Interrupted, finishing in-flight issues and restoring notifications"
                        );
                        eprintln!(
                            "Interrupted, finishing in-flight issues and restoring notifications..."
                        );
                    } else {
                        warn!("Already cancelling, waiting for in-flight issues to finish");
                    }
                }
            });
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

fn print_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for project in report.troubled_projects() {
        if let Some(reason) = &project.skipped {
            println!("Project {} was skipped: {reason}", project.project);
        }
        if let Some(err) = &project.restore_error {
            println!(
                "Notification scheme of project {} was NOT restored: {err}",
                project.project
            );
        }
    }

    if let Some(summary) = report.failure_summary() {
        println!("{summary}");
    }

    let errored = report.errored_keys();
    if !errored.is_empty() {
        let keys: Vec<&str> = errored.into_iter().collect();
        println!("The following issues hit an unexpected error: {}", keys.join(", "));
    }

    if report.cancelled {
        println!("Run cancelled before all issues were processed");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_file, cli.verbose)?;

    let config = load_config(&cli).inspect_err(|err| error!("{err:#}"))?;
    let credentials = resolve_credentials(&config.auth, config.base_url())
        .context("cannot authenticate")
        .inspect_err(|err| error!("{err:#}"))?;

    let tracker = JiraClient::new(
        config.base_url(),
        &credentials,
        Duration::from_secs(config.request_timeout_secs),
    );
    let converter = PandocConverter::from_config(&config.converter);
    let options = RunOptions {
        dry_run: cli.dry_run,
        ..RunOptions::from_config(&config)
    };

    if options.dry_run {
        info!("Dry run: nothing will be written to {}", config.base_url());
    }
    info!(
        "Migrating {} project(s) with {} workers, page size {}",
        config.projects.len(),
        options.workers,
        options.page_size
    );

    let cancel = CancelToken::new();
    watch_interrupts(cancel.clone())?;

    let report = run::run(&tracker, &converter, &config.projects, &options, &cancel);
    info!("Run finished");

    print_report(&report, cli.json)
}
