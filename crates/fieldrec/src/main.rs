//! fieldrec command-line driver.
//!
//! Every command prints JSON on stdout. Failures print a JSON error object on
//! stderr and exit non-zero.

use clap::{Parser, Subcommand};
use fieldrec_ids::EntityId;
use fieldrec_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

use cli::context::GlobalArgs;

#[derive(Parser, Debug)]
#[command(name = "fieldrec", about = "Versioned approval workflow for field records")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Workflow config file (TOML)
    #[arg(long, global = true, env = "FIELDREC_CONFIG")]
    config: Option<PathBuf>,

    /// Bearer token identifying the caller
    #[arg(long, global = true, env = "FIELDREC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// SQLite database path (overrides the configured backend)
    #[arg(long, global = true, conflicts_with = "objects")]
    database: Option<PathBuf>,

    /// Object store root directory (overrides the configured backend)
    #[arg(long, global = true)]
    objects: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register and look up entities
    Entity {
        #[command(subcommand)]
        action: cli::entity::EntityAction,
    },

    /// Create, edit and inspect versions
    Version {
        #[command(subcommand)]
        action: cli::version::VersionAction,
    },

    /// Submit a draft for review
    Submit {
        entity_id: EntityId,
        version_no: u32,
        /// Recorded as a submission comment
        #[arg(long)]
        note: Option<String>,
    },

    /// Approve a submitted version and publish it
    Approve {
        entity_id: EntityId,
        version_no: u32,
        #[arg(long)]
        comments: Option<String>,
    },

    /// Reject a submitted version
    Reject {
        entity_id: EntityId,
        version_no: u32,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Send a submitted version back to its author
    Return {
        entity_id: EntityId,
        version_no: u32,
        #[arg(long)]
        comments: Option<String>,
    },

    /// Read published records
    Published {
        #[command(subcommand)]
        action: cli::published::PublishedAction,
    },

    /// Review comments
    Comments {
        #[command(subcommand)]
        action: cli::comments::CommentsAction,
    },

    /// Recompute aggregates and finish interrupted approvals
    Reconcile,

    /// Rebuild the entity lookup index (object store backend)
    Reindex,
}

fn run_command(cli: Cli) -> anyhow::Result<()> {
    let globals = GlobalArgs {
        config: cli.config,
        token: cli.token,
        database: cli.database,
        objects: cli.objects,
    };

    match cli.command {
        Commands::Entity { action } => cli::entity::run(action, &globals),
        Commands::Version { action } => cli::version::run(action, &globals),
        Commands::Submit {
            entity_id,
            version_no,
            note,
        } => cli::review::run(
            cli::review::ReviewArgs {
                action: cli::review::ReviewAction::Submit,
                entity_id,
                version_no,
                text: note,
            },
            &globals,
        ),
        Commands::Approve {
            entity_id,
            version_no,
            comments,
        } => cli::review::run(
            cli::review::ReviewArgs {
                action: cli::review::ReviewAction::Approve,
                entity_id,
                version_no,
                text: comments,
            },
            &globals,
        ),
        Commands::Reject {
            entity_id,
            version_no,
            reason,
        } => cli::review::run(
            cli::review::ReviewArgs {
                action: cli::review::ReviewAction::Reject,
                entity_id,
                version_no,
                text: reason,
            },
            &globals,
        ),
        Commands::Return {
            entity_id,
            version_no,
            comments,
        } => cli::review::run(
            cli::review::ReviewArgs {
                action: cli::review::ReviewAction::Return,
                entity_id,
                version_no,
                text: comments,
            },
            &globals,
        ),
        Commands::Published { action } => cli::published::run(action, &globals),
        Commands::Comments { action } => cli::comments::run(action, &globals),
        Commands::Reconcile => cli::maintenance::run_reconcile(&globals),
        Commands::Reindex => cli::maintenance::run_reindex(&globals),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match init_logging(LogConfig {
        app_name: "fieldrec",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: failed to initialise logging: {:#}", err);
            None
        }
    };

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            cli::output::print_error(&err);
            ExitCode::FAILURE
        }
    }
}
