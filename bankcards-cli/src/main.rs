//! BankCards CLI - manage cards and move money from the terminal

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

use commands::{card, init, owner, sweep, transfer};

/// Cards - bank card administration and transfers
#[derive(Parser)]
#[command(name = "cards", version, about, long_about = None)]
struct Cli {
    /// Show debug logs
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and a card encryption key
    Init {
        /// Cipher transformation (AES/ECB/PKCS5Padding or AES/GCM/DETERMINISTIC)
        #[arg(long)]
        transformation: Option<String>,
        /// Replace an existing key (cards encrypted with it become unreadable)
        #[arg(long)]
        force: bool,
    },

    /// Manage card owners
    Owner {
        #[command(subcommand)]
        command: owner::OwnerCommands,
    },

    /// Manage cards
    Card {
        #[command(subcommand)]
        command: card::CardCommands,
    },

    /// Move money between two cards of the same owner
    Transfer {
        /// Owner ID
        #[arg(long)]
        owner: i64,
        /// Source card number
        #[arg(long)]
        from: String,
        /// Destination card number
        #[arg(long)]
        to: String,
        /// Amount, rounded half-up to cents
        #[arg(long)]
        amount: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Expire cards whose validity has passed
    Sweep {
        /// Keep running and sweep periodically until Ctrl-C
        #[arg(long)]
        watch: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so --json output stays clean
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            if let Some(core_error) = e.downcast_ref::<bankcards_core::Error>() {
                if core_error.is_retryable() {
                    output::warning("The cards are busy; the request can be resubmitted unchanged.");
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Init { transformation, force } => init::run(transformation.as_deref(), force),
        Commands::Owner { command } => owner::run(command),
        Commands::Card { command } => card::run(command),
        Commands::Transfer { owner, from, to, amount, json } => transfer::run(owner, &from, &to, &amount, json),
        Commands::Sweep { watch, json } => sweep::run(watch, json),
    }
}
