mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    backup::BackupSubcommand, checkpoint::CheckpointSubcommand, config::ConfigSubcommand,
    decision::DecisionSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "flowstate",
    about = "Phase-gated workflow state with checkpoints, backups and recovery",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .flowstate/ or .git/)
    #[arg(long, global = true, env = "FLOWSTATE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a workflow (new-project or existing-project)
    Start {
        workflow_type: String,
        /// Plan phase work across agents in parallel
        #[arg(long)]
        parallel: bool,
        /// Replace a workflow that is still active
        #[arg(long)]
        force: bool,
        /// Start without checking agent availability
        #[arg(long)]
        skip_preflight: bool,
    },

    /// Show workflow status and progress
    Status,

    /// Complete the current phase
    Complete {
        /// Summary of what the phase produced
        #[arg(long)]
        summary: Option<String>,
    },

    /// Approve the pending gate
    Approve {
        gate: String,
        #[arg(long)]
        by: Option<String>,
        /// Extra metadata as key=value (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,
    },

    /// Update progress of the current phase
    Progress {
        #[arg(long)]
        created: Option<u32>,
        #[arg(long)]
        total: Option<u32>,
        /// Explicit percentage (overridden when document counts are given)
        #[arg(long)]
        percent: Option<f64>,
        /// Estimated minutes remaining in this phase
        #[arg(long)]
        eta: Option<u32>,
        /// Active agent as name or name=status (repeatable)
        #[arg(long = "agent", value_name = "NAME[=STATUS]")]
        agents: Vec<String>,
    },

    /// Checkpoint the current state with a note
    Pause {
        #[arg(long)]
        note: Option<String>,
    },

    /// Check the workflow can continue and show where
    Resume,

    /// Report approval gate timeouts (advisory)
    Timeouts,

    /// List approval gates and their state
    Gates,

    /// Select an operational phase after the sequential phases
    Select { phase: String },

    /// Mark the workflow completed
    Finish,

    /// Validate state files
    Validate {
        /// A single file under .flowstate/ (default: all)
        file: Option<String>,
        /// Apply safe repairs
        #[arg(long)]
        repair: bool,
    },

    /// List and restore checkpoints
    Checkpoint {
        #[command(subcommand)]
        subcommand: CheckpointSubcommand,
    },

    /// Create, list, verify and prune backups
    Backup {
        #[command(subcommand)]
        subcommand: BackupSubcommand,
    },

    /// Check agent availability for a workflow type
    Preflight { workflow_type: String },

    /// Split work units across agents without sharing a file
    Plan {
        /// Work unit as PATH[:CATEGORY]
        #[arg(long = "unit", value_name = "PATH[:CATEGORY]", required = true)]
        units: Vec<String>,
        /// Agents to plan for (default: the workflow's configured agents)
        #[arg(long = "agent", value_name = "NAME")]
        agents: Vec<String>,
    },

    /// Record and list decisions
    Decision {
        #[command(subcommand)]
        subcommand: DecisionSubcommand,
    },

    /// Run the recovery strategy for an error kind
    Recover {
        /// state-corruption, invalid-phase, network-error, agent-failure, validation-error
        kind: String,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        critical: bool,
        #[arg(long)]
        phase: Option<String>,
        #[arg(long)]
        gate: Option<String>,
        /// State file the error concerns
        #[arg(long)]
        file: Option<String>,
        /// Attempts already made (network errors)
        #[arg(long, default_value = "0")]
        attempt: u32,
    },

    /// Inspect and validate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let json = cli.json;

    let result = match cli.command {
        Commands::Start {
            workflow_type,
            parallel,
            force,
            skip_preflight,
        } => cmd::start::run(&root, &workflow_type, parallel, force, skip_preflight, json),
        Commands::Status => cmd::status::run(&root, json),
        Commands::Complete { summary } => cmd::phase::complete(&root, summary, json),
        Commands::Approve { gate, by, metadata } => {
            cmd::approve::approve(&root, &gate, by, &metadata, json)
        }
        Commands::Progress {
            created,
            total,
            percent,
            eta,
            agents,
        } => cmd::phase::progress(&root, created, total, percent, eta, &agents, json),
        Commands::Pause { note } => cmd::session::pause(&root, note, json),
        Commands::Resume => cmd::session::resume(&root, json),
        Commands::Timeouts => cmd::approve::timeouts(&root, json),
        Commands::Gates => cmd::approve::gates(&root, json),
        Commands::Select { phase } => cmd::phase::select(&root, &phase, json),
        Commands::Finish => cmd::phase::finish(&root, json),
        Commands::Validate { file, repair } => {
            cmd::validate::run(&root, file.as_deref(), repair, json)
        }
        Commands::Checkpoint { subcommand } => cmd::checkpoint::run(&root, subcommand, json),
        Commands::Backup { subcommand } => cmd::backup::run(&root, subcommand, json),
        Commands::Preflight { workflow_type } => cmd::preflight::run(&root, &workflow_type, json),
        Commands::Plan { units, agents } => cmd::plan::run(&root, &units, &agents, json),
        Commands::Decision { subcommand } => cmd::decision::run(&root, subcommand, json),
        Commands::Recover {
            kind,
            message,
            agent,
            critical,
            phase,
            gate,
            file,
            attempt,
        } => cmd::recover::run(
            &root,
            cmd::recover::RecoverArgs {
                kind,
                message,
                agent,
                critical,
                phase,
                gate,
                file,
                attempt,
            },
            json,
        ),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
