//! Relay Chat - Terminal Client for Streaming Assistant Answers
//!
//! Asks one question and prints the answer as it streams in. When the push
//! channel cannot be opened the answer is fetched synchronously instead.
//!
//! # Usage
//!
//! ```bash
//! # Ask in a new conversation
//! relay-chat --tenant acme "Which guarantees expire this quarter?"
//!
//! # Continue an existing conversation over a Unix socket
//! relay-chat --tenant acme --transport unix_socket --socket /run/relay.sock \
//!     --conversation c-42 "And the one after that?"
//!
//! # Verbose logging
//! RUST_LOG=debug relay-chat --tenant acme "hello"
//! ```
//!
//! Ctrl-C while an answer is streaming cancels it; the partial answer stays
//! on screen.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use relay_core::{
    Activity, AskOutcome, AskRequest, CallbackSet, ConfigOverrides, ConversationRef,
    CorrelationId, FallbackAnswer, HttpSubmissionApi, SessionNotice, StreamClient,
    SuggestedAction,
};

/// Relay Chat - ask an assistant and watch the answer stream in
#[derive(Parser, Debug)]
#[command(name = "relay-chat")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Question to ask
    #[arg(required = true, value_name = "MESSAGE")]
    message: Vec<String>,

    /// Tenant to connect as (overrides config and RELAY_TENANT)
    #[arg(short = 't', long, value_name = "ID")]
    tenant: Option<String>,

    /// Existing conversation id; a new conversation is created otherwise
    #[arg(long, value_name = "ID")]
    conversation: Option<String>,

    /// Push transport: in_process, unix_socket, websocket
    #[arg(long, value_name = "KIND")]
    transport: Option<String>,

    /// Unix socket path for the push channel
    #[arg(short = 's', long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// WebSocket URL for the push channel
    #[arg(long, value_name = "URL")]
    ws_url: Option<String>,

    /// Submission API root
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(tenant) = &self.tenant {
            overrides = overrides.with_tenant(tenant.as_str());
        }
        if let Some(kind) = &self.transport {
            overrides = overrides.with_transport(kind.as_str());
        }
        if let Some(path) = &self.socket {
            overrides = overrides.with_socket_path(path.clone());
        }
        if let Some(url) = &self.ws_url {
            overrides = overrides.with_ws_url(url.as_str());
        }
        if let Some(url) = &self.api_url {
            overrides = overrides.with_api_url(url.as_str());
        }
        overrides
    }

    fn conversation(&self) -> ConversationRef {
        match &self.conversation {
            Some(id) => ConversationRef::Server(id.as_str().into()),
            None => ConversationRef::placeholder(),
        }
    }
}

/// Logs go to stderr so stdout carries only the answer
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_chat={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// Rendering
// ============================================================================

/// Prints cumulative snapshots as deltas
#[derive(Default)]
struct Printer {
    shown: String,
}

impl Printer {
    fn show(&mut self, content: &str) -> Result<()> {
        let mut out = std::io::stdout().lock();
        match content.strip_prefix(self.shown.as_str()) {
            Some(delta) => out.write_all(delta.as_bytes())?,
            // Server rewrote earlier text; start over on a fresh line
            None => write!(out, "\n{content}")?,
        }
        out.flush()?;
        self.shown = content.to_string();
        Ok(())
    }

    fn finish(&mut self, content: &str, actions: &[SuggestedAction]) -> Result<()> {
        self.show(content)?;
        println!();
        print_actions(actions);
        Ok(())
    }
}

fn print_actions(actions: &[SuggestedAction]) {
    if actions.is_empty() {
        return;
    }
    println!();
    for (i, action) in actions.iter().enumerate() {
        println!("  {}. {}", i + 1, action.label);
    }
}

fn print_fallback(answer: &FallbackAnswer) {
    println!("{}", answer.content);
    print_actions(&answer.suggested_actions);
}

/// Print notices until the session ends; Ctrl-C cancels it
async fn follow(
    client: &StreamClient,
    correlation_id: CorrelationId,
    mut notices: mpsc::UnboundedReceiver<SessionNotice>,
) -> Result<()> {
    let mut printer = Printer::default();
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            notice = notices.recv() => {
                let Some(notice) = notice else {
                    anyhow::bail!("session ended without a result");
                };
                match notice {
                    SessionNotice::Update(update) => match update.activity {
                        Activity::Content { .. } => printer.show(&update.content)?,
                        Activity::Tool { phase, tool_name, .. } => {
                            info!(?phase, tool = tool_name.as_deref().unwrap_or("?"), "tool activity");
                        }
                    },
                    SessionNotice::Completed(completion) => {
                        printer.finish(&completion.content, &completion.suggested_actions)?;
                        return Ok(());
                    }
                    SessionNotice::Failed(failure) => {
                        printer.shown.clear();
                        println!();
                        println!("{}", failure.annotated_content());
                        if failure.error.is_cancellation() {
                            return Ok(());
                        }
                        anyhow::bail!("answer failed: {}", failure.error);
                    }
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                client.cancel(correlation_id.clone(), "user");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config_path = args
        .config
        .clone()
        .or_else(relay_core::default_config_path);
    let mut config =
        relay_core::load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides()
        .apply(&mut config)
        .context("Invalid command line options")?;

    info!(
        source = ?config.source(),
        transport = ?config.transport.transport,
        api = %config.submission.base_url,
        "configuration loaded"
    );

    let connector = relay_core::transport::create_connector(&config.transport)
        .context("Failed to create push transport")?;
    let api = Arc::new(
        HttpSubmissionApi::new(&config.submission).context("Failed to create API client")?,
    );
    let client = StreamClient::new(connector, api, config.client_options());

    match &config.tenant {
        Some(tenant) => {
            if let Err(e) = client.connect(tenant.clone()).await {
                warn!(error = %e, "push channel unavailable, answer will not stream");
            }
        }
        None => warn!("no tenant configured, answer will not stream"),
    }

    let mut request = AskRequest::new(args.conversation(), args.message.join(" "));
    request.title = Some(args.message.join(" ").chars().take(60).collect());

    let (callbacks, notices) = CallbackSet::channel();
    let outcome = client
        .ask(request, callbacks)
        .await
        .context("Failed to submit question")?;

    let result = match outcome {
        AskOutcome::Completed(answer) => {
            print_fallback(&answer);
            Ok(())
        }
        AskOutcome::Streaming {
            correlation_id,
            conversation_id,
            ..
        } => {
            info!(conversation_id = %conversation_id, "answer streaming");
            follow(&client, correlation_id, notices).await
        }
    };

    client.disconnect().await;
    result
}
