#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "tenure: interval history of security attributes from daily snapshots",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (pretty, text, json).
    #[arg(long, value_enum, global = true)]
    format: Option<OutputMode>,

    /// Emit JSON output (shorthand for `--format json`).
    #[arg(long, global = true)]
    json: bool,

    /// History database path (overrides `[store] path`).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Snapshot root directory (overrides `[source] root`).
    #[arg(long, global = true)]
    snapshots: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }

    fn overrides(&self) -> cmd::Overrides {
        cmd::Overrides {
            db: self.db.clone(),
            snapshots: self.snapshots.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Initialize a tenure project",
        long_about = "Write .tenure/config.toml and create the history database.",
        after_help = "EXAMPLES:\n    # Initialize in the current directory\n    tn init\n\n    # Keep the database elsewhere\n    tn --db /var/lib/tenure/history.db init"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Runs",
        about = "Reconcile one day's snapshot",
        long_about = "Reconcile the snapshot for one date against the stored history.",
        after_help = "EXAMPLES:\n    # Today's run\n    tn daily\n\n    # A specific date\n    tn daily --date 20200615\n\n    # Show what would change\n    tn daily --date 2020-06-15 --dry-run"
    )]
    Daily(cmd::daily::DailyArgs),

    #[command(
        next_help_heading = "Runs",
        about = "Replay a date range in order",
        long_about = "Reconcile every date in an inclusive range, skipping dates without snapshots.",
        after_help = "EXAMPLES:\n    # Replay 2020\n    tn backfill --from 2020-01-01 --to 2020-12-31\n\n    # Continue after the last committed date\n    tn backfill --resume"
    )]
    Backfill(cmd::backfill::BackfillArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show an entity's history",
        after_help = "EXAMPLES:\n    # Every attribute\n    tn show 005930\n\n    # Sector only\n    tn show 005930 --attribute sector"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Read",
        about = "Attribute values on a date",
        after_help = "EXAMPLES:\n    tn as-of 005930 --date 2020-06-15"
    )]
    AsOf(cmd::as_of::AsOfArgs),

    #[command(next_help_heading = "Read", about = "Show database and run cursor status")]
    Status(cmd::status::StatusArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Check interval invariants",
        long_about = "Check every key for overlapping intervals, inverted intervals and duplicate open records."
    )]
    Verify(cmd::verify::VerifyArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    tn completions bash > /etc/bash_completion.d/tn"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("TENURE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "tenure=debug,info"
        } else {
            "tenure=info,warn"
        })
    });

    let format = env::var("TENURE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli, output: OutputMode) -> anyhow::Result<()> {
    // Completions never touch the project, so a broken config cannot block them.
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        return cmd::completions::run_completions(args.shell, &mut command);
    }

    let project_root = env::current_dir()?;
    let project = cmd::Project::load(&project_root, &cli.overrides())?;

    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, &project, output),
        Commands::Daily(args) => cmd::daily::run_daily(args, &project, output),
        Commands::Backfill(args) => cmd::backfill::run_backfill(args, &project, output),
        Commands::Show(args) => cmd::show::run_show(args, &project, output),
        Commands::AsOf(args) => cmd::as_of::run_as_of(args, &project, output),
        Commands::Status(args) => cmd::status::run_status(args, &project, output),
        Commands::Verify(args) => cmd::verify::run_verify(args, &project, output),
        Commands::Completions(_) => Ok(()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = cli.output_mode();
    debug!(?output, "output mode resolved");

    match run(&cli, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            debug!(error = ?err, "command failed");
            let cli_error = CliError::from(&err);
            if render_error(output, &cli_error).is_err() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
