//! `ReverseQR` connector CLI
//!
//! Joins a session shown by a `ReverseQR` initiator, confirms the
//! verification phrase and exchanges encrypted text and files through the
//! relay.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use reverseqr_client::code_cmd;
use reverseqr_client::connect_cmd::{self, ConnectArgs};
use reverseqr_core::config::load_config;
use reverseqr_core::tracing_init::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "reverseqr")]
#[command(version, about = "ReverseQR connector - end-to-end encrypted transfer through a relay")]
struct Cli {
    /// Relay base URL (overrides the config file)
    #[arg(long, global = true, env = "REVERSEQR_RELAY_URL")]
    relay_url: Option<String>,

    /// Explicit config file (default: ~/.config/reverseqr/settings.json)
    #[arg(long, global = true, env = "REVERSEQR_CONFIG")]
    config: Option<PathBuf>,

    /// Output logs as JSON
    #[arg(long, global = true, env = "REVERSEQR_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the spoken form of a hex connection code.
    Words {
        /// Hex connection code (even length)
        code: String,
    },
    /// Convert spoken words back to a hex connection code.
    Decode {
        /// Words, one per byte
        #[arg(required = true, num_args = 1..)]
        words: Vec<String>,
    },
    /// Join a session, verify and exchange messages.
    Connect(ConnectArgs),
}

#[tokio::main]
#[allow(clippy::print_stdout)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(url) = cli.relay_url {
        config.relay.url = url;
    }

    let level = &config.log_level;
    init_tracing(
        &format!(
            "reverseqr={level},reverseqr_client={level},reverseqr_core={level},reverseqr_crypto={level}"
        ),
        cli.log_json,
    );
    info!(version = env!("CARGO_PKG_VERSION"), relay = %config.relay.url, "Starting reverseqr");

    let code_table = config.wordlists.code_path.as_deref();
    match cli.command {
        Command::Words { code } => println!("{}", code_cmd::words(&code, code_table)?),
        Command::Decode { words } => println!("{}", code_cmd::decode_words(&words, code_table)?),
        Command::Connect(args) => connect_cmd::run(args, &config).await?,
    }
    Ok(())
}
