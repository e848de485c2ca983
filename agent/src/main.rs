//! GitOps agent daemon.
//!
//! Polls a git branch, validates and executes newly committed shell scripts
//! and container builds, and records their status under `.gitops/`.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use gitops_agent::exit_codes;
use gitops_agent::io::config::{AgentConfig, load_config, write_config};
use gitops_agent::io::status_store::StatusStore;
use gitops_agent::logging;
use gitops_agent::pipeline::Pipeline;
use gitops_agent::poll::{FatalError, Poller, TickOutcome, open_monitored_repo};
use gitops_agent::viewer::{self, ViewerState};

const DEFAULT_CONFIG: &str = ".gitops/config.toml";

#[derive(Parser)]
#[command(
    name = "gitops-agent",
    version,
    about = "Poll a git branch and deploy newly committed artifacts"
)]
struct Cli {
    /// Repository to monitor.
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Config file (defaults to `<repo>/.gitops/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Start the poll loop.
    Run {
        /// Run a single tick and exit.
        #[arg(long)]
        once: bool,
    },
    /// Print the status snapshot, or one artifact's status.
    Status {
        identifier: Option<String>,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match dispatch(&cli) {
        Ok(code) => code,
        Err(err) => {
            if let Some(fatal) = err.downcast_ref::<FatalError>() {
                error!(error = %fatal, "fatal");
            }
            eprintln!("{err:#}");
            exit_codes::FATAL
        }
    };
    process::exit(code);
}

fn dispatch(cli: &Cli) -> Result<i32> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.repo.join(DEFAULT_CONFIG));
    match &cli.command {
        Command::Init { force } => cmd_init(&config_path, *force),
        Command::Run { once } => cmd_run(&cli.repo, &config_path, *once),
        Command::Status { identifier } => cmd_status(&cli.repo, &config_path, identifier.as_deref()),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        ));
    }
    write_config(config_path, &AgentConfig::default())?;
    println!("{}", config_path.display());
    Ok(exit_codes::OK)
}

fn load(config_path: &Path) -> Result<AgentConfig, FatalError> {
    load_config(config_path).map_err(|err| FatalError::ConfigLoad {
        path: config_path.to_path_buf(),
        detail: format!("{err:#}"),
    })
}

fn cmd_run(root: &Path, config_path: &Path, once: bool) -> Result<i32> {
    let cfg = load(config_path)?;
    let repo = open_monitored_repo(root, &cfg)?;
    let pipeline = Pipeline::from_config(&cfg, root)?;

    if cfg.viewer.enabled {
        let state = ViewerState::new(
            pipeline.store().clone(),
            cfg.log_dir_in(root),
            cfg.shell_assets_dir(root),
        );
        viewer::spawn(&cfg.viewer, state)?;
    }

    let mut poller = Poller::new(repo, pipeline, cfg.poll_state_path(root), cfg.poll_interval())?;
    info!(
        interval_secs = cfg.poll_interval_secs,
        once, "starting poll loop"
    );
    poller.run(once.then_some(1), |outcome| {
        if let TickOutcome::Processed { commit, summary } = outcome {
            info!(
                commit = %commit,
                succeeded = summary.succeeded(),
                failed = summary.failed(),
                "commit processed"
            );
        }
    });
    Ok(exit_codes::OK)
}

fn cmd_status(root: &Path, config_path: &Path, identifier: Option<&str>) -> Result<i32> {
    let cfg = load(config_path)?;
    let status_path = cfg.status_path(root);
    let store = StatusStore::load(&status_path)?;
    let rendered = match identifier {
        Some(id) => match store.get(id) {
            Some(status) => serde_json::to_string_pretty(&status).context("serialize status")?,
            None => {
                eprintln!("unknown artifact '{id}'");
                return Ok(exit_codes::UNKNOWN_ARTIFACT);
            }
        },
        None => serde_json::to_string_pretty(&store.snapshot()).context("serialize status")?,
    };
    println!("{rendered}");
    Ok(exit_codes::OK)
}
