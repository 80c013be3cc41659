use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod context;
mod output;

use commands::apply::run_apply;
use commands::chat::{run_chat, run_history, run_new, run_retry};
use commands::config::run_config;
use commands::decode::run_decode;

#[derive(Parser)]
#[command(name = "turbo")]
#[command(about = "Turbo writing assistant", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the assistant, optionally about a selection of a file.
    Chat(ChatArgs),
    /// Resubmit the most recent user message.
    Retry(RetryArgs),
    /// Apply a suggestion from a stored reply to a file.
    Apply(ApplyArgs),
    /// Run the decoder on a captured raw reply.
    Decode(DecodeArgs),
    /// Show or clear the stored conversation.
    History(HistoryArgs),
    /// Start a new conversation.
    New,
    /// Show the effective configuration with secrets redacted.
    Config,
}

#[derive(Args)]
struct ChatArgs {
    prompt: String,
    /// File the question is about.
    #[arg(long)]
    file: Option<PathBuf>,
    /// Character range `START:END` of `--file` sent as the selection.
    #[arg(long)]
    select: Option<String>,
    /// Override the configured model for this turn.
    #[arg(long)]
    model: Option<String>,
}

#[derive(Args)]
struct RetryArgs {
    #[arg(long)]
    model: Option<String>,
}

#[derive(Args)]
struct ApplyArgs {
    message_id: String,
    suggestion_id: String,
    #[arg(long)]
    file: PathBuf,
    /// Selection `START:END` a replacement substitutes.
    #[arg(long)]
    select: Option<String>,
    /// Character offset an insertion goes to; defaults to the end.
    #[arg(long)]
    cursor: Option<usize>,
}

#[derive(Args)]
struct DecodeArgs {
    /// Raw reply file, or `-` for stdin. Defaults to the latest captured turn.
    source: Option<String>,
    /// Classify as a finished stream instead of an in-flight one.
    #[arg(long = "final")]
    final_verdict: bool,
    /// Decode the captured raw text of this turn.
    #[arg(long)]
    turn: Option<String>,
}

#[derive(Args)]
struct HistoryArgs {
    #[arg(long)]
    clear: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Chat(args) => run_chat(&cwd, args, cli.json, cli.verbose),
        Commands::Retry(args) => run_retry(&cwd, args, cli.json, cli.verbose),
        Commands::Apply(args) => run_apply(&cwd, args, cli.json, cli.verbose),
        Commands::Decode(args) => run_decode(&cwd, args, cli.json),
        Commands::History(args) => run_history(&cwd, args, cli.json),
        Commands::New => run_new(&cwd, cli.json),
        Commands::Config => run_config(&cwd, cli.json),
    }
}
