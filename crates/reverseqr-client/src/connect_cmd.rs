//! `reverseqr connect`: join a session by code, verify, send and listen.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{info, warn};

use reverseqr_core::{Config, PhraseWordlist};

use crate::code_cmd::resolve_code;
use crate::notify::{NotificationTransport, SessionEvent, WebSocketTransport};
use crate::receive::{ReceivedContent, ReceivedMessageRecord, UNDECRYPTABLE_NAME};
use crate::relay::{HttpRelay, RelayApi};
use crate::signaling::{SessionContext, SignalingClient};
use crate::transport::{Outgoing, OutgoingFile, SentContent};

#[derive(clap::Args, Debug)]
pub struct ConnectArgs {
    /// Connection code: hex, or the spoken words separated by spaces
    #[arg(required = true, num_args = 1..)]
    pub code: Vec<String>,

    /// Text message to send once paired
    #[arg(long)]
    pub send_text: Option<String>,

    /// File to send once paired (repeatable)
    #[arg(long = "send-file")]
    pub send_files: Vec<PathBuf>,

    /// Stay connected and print incoming messages until Ctrl+C
    #[arg(long)]
    pub listen: bool,
}

/// Execute the `connect` subcommand.
#[allow(clippy::print_stderr)]
pub async fn run(args: ConnectArgs, config: &Config) -> Result<()> {
    let code = resolve_code(&args.code.join(" "), config.wordlists.code_path.as_deref())?;

    let mut files = Vec::with_capacity(args.send_files.len());
    for path in &args.send_files {
        files.push(
            OutgoingFile::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        );
    }
    let outgoing = Outgoing {
        text: args.send_text,
        files,
    };

    let relay = Arc::new(HttpRelay::new(&config.relay)?);
    let notifications = Arc::new(WebSocketTransport::new(config.relay.notification_url()));
    let phrase_words = phrase_wordlist(relay.as_ref(), config.wordlists.phrase_path.as_deref()).await?;
    let mut client = SignalingClient::new(relay, notifications, config.signaling.clone(), phrase_words);
    let mut ctx = SessionContext::connector(code);

    eprintln!("Joining session {}...", ctx.code());
    let result = session(&mut client, &mut ctx, outgoing, args.listen, config).await;
    client.close(&mut ctx).await;
    result
}

/// Word list for the verification phrase: a configured file, else the one
/// the relay serves to its own pages so both sides show the same words.
/// The bundled list is a last resort and will not match a relay-page peer.
async fn phrase_wordlist<R: RelayApi + ?Sized>(
    relay: &R,
    configured: Option<&Path>,
) -> Result<PhraseWordlist> {
    if let Some(path) = configured {
        return Ok(PhraseWordlist::from_path(path)?);
    }
    match relay.phrase_wordlist().await {
        Ok(words) => Ok(words),
        Err(e) => {
            warn!(error = %e, "Relay phrase wordlist unavailable, using the bundled list; phrases may not match the other device");
            Ok(PhraseWordlist::bundled()?.clone())
        }
    }
}

async fn session<R, N>(
    client: &mut SignalingClient<R, N>,
    ctx: &mut SessionContext,
    outgoing: Outgoing,
    listen: bool,
    config: &Config,
) -> Result<()>
where
    R: RelayApi + ?Sized,
    N: NotificationTransport + ?Sized,
{
    client.pair(ctx).await.context("Pairing failed")?;
    print_phrase(ctx.verification_phrase().unwrap_or_default());

    if !outgoing.is_empty() {
        client.send(ctx, outgoing).await.context("Send failed")?;
        print_sent(ctx);
    }

    if listen {
        listen_loop(client, ctx, config.receive.poll_interval_secs).await?;
    }
    Ok(())
}

async fn listen_loop<R, N>(
    client: &mut SignalingClient<R, N>,
    ctx: &mut SessionContext,
    poll_interval_secs: Option<u64>,
) -> Result<()>
where
    R: RelayApi + ?Sized,
    N: NotificationTransport + ?Sized,
{
    let mut poll = poll_interval_secs.map(|secs| {
        let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    // Anything sent before the channel came up.
    fetch_and_print(client, ctx).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, closing session");
                break;
            }
            event = client.next_event() => match event {
                Some(SessionEvent::MessageAvailable) => fetch_and_print(client, ctx).await?,
                Some(SessionEvent::Reconnecting { attempt }) => {
                    warn!(attempt, "Notification channel dropped, reconnecting");
                }
                Some(SessionEvent::ChannelLost) | None => {
                    if poll.is_none() {
                        bail!("Notification channel lost");
                    }
                    warn!("Notification channel lost, relying on polling");
                }
            },
            () = tick(poll.as_mut()) => fetch_and_print(client, ctx).await?,
        }
    }
    Ok(())
}

async fn tick(poll: Option<&mut Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn fetch_and_print<R, N>(
    client: &SignalingClient<R, N>,
    ctx: &mut SessionContext,
) -> Result<()>
where
    R: RelayApi + ?Sized,
    N: NotificationTransport + ?Sized,
{
    match client.receive(ctx).await {
        Ok(records) => {
            records.iter().for_each(print_record);
            Ok(())
        }
        Err(e) if e.is_retryable() => {
            warn!(error = %e, "Retrieval failed, will retry on next notification");
            Ok(())
        }
        Err(e) => Err(e).context("Retrieval failed"),
    }
}

#[allow(clippy::print_stdout)]
fn print_phrase(phrase: &str) {
    println!("Verification phrase: {phrase}");
    println!("Confirm it matches the phrase shown on the other device.");
}

#[allow(clippy::print_stdout)]
fn print_sent(ctx: &SessionContext) {
    for record in ctx.sent() {
        match &record.content {
            SentContent::Text(text) => println!("> {text}"),
            SentContent::Files(files) => {
                for file in files {
                    println!("> {} ({})", file.name, format_size(file.size));
                }
            }
        }
    }
}

#[allow(clippy::print_stdout)]
fn print_record(record: &ReceivedMessageRecord) {
    for line in render_record(record) {
        println!("{line}");
    }
}

fn render_record(record: &ReceivedMessageRecord) -> Vec<String> {
    let id = escape_controls(&record.id.to_string(), false);
    match &record.content {
        ReceivedContent::Text(text) => vec![format!("[{id}] {}", escape_controls(text, true))],
        ReceivedContent::Files(files) => files
            .iter()
            .map(|f| {
                let name = escape_controls(&f.name, false);
                format!("[{id}] file: {name} ({})", format_size(f.size))
            })
            .collect(),
        ReceivedContent::Undecryptable(e) => {
            vec![format!("[{id}] {UNDECRYPTABLE_NAME} ({e})")]
        }
    }
}

/// Escape control characters in peer-supplied text so it cannot drive the
/// terminal. Line breaks and tabs survive in message bodies.
fn escape_controls(text: &str, keep_layout: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_control() && !(keep_layout && matches!(c, '\n' | '\t')) {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }
    out
}

/// Human-readable byte count in binary units.
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
