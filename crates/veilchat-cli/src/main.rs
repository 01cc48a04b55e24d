//! Veilchat demo binary.
//!
//! Signs two users into an in-memory server, has them exchange encrypted
//! messages, then walks one side's history backwards. Everything is reported
//! through `tracing`.
//!
//! # Usage
//!
//! ```bash
//! # Default config, three rounds
//! veilchat
//!
//! # Small pages so paging is visible
//! veilchat --config veilchat.toml --rounds 12 --log-level debug
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use secrecy::SecretString;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use veilchat_app::{Inbox, Messenger, ViewEvent};
use veilchat_client::Content;
use veilchat_core::{ClientConfig, SetupIntent, SystemEnv};
use veilchat_harness::SimServer;

/// Veilchat scripted exchange
#[derive(Parser, Debug)]
#[command(name = "veilchat")]
#[command(about = "Run a scripted end-to-end encrypted exchange between two users")]
#[command(version)]
struct Args {
    /// Path to a TOML client config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// First user
    #[arg(long, default_value = "alice")]
    sender: String,

    /// Second user
    #[arg(long, default_value = "bob")]
    recipient: String,

    /// Message rounds (one message each way per round)
    #[arg(long, default_value = "3")]
    rounds: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// PIN both demo users set up with.
const DEMO_PIN: &str = "2468";

/// How long to wait for the bus to deliver before reading.
const DELIVERY_GRACE: Duration = Duration::from_millis(50);

struct Participant {
    messenger: Messenger<SystemEnv>,
    inbox: Inbox,
    events: UnboundedReceiver<ViewEvent>,
}

impl Participant {
    async fn sign_up(
        server: &SimServer,
        name: &str,
        config: &ClientConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let (messenger, events) =
            Messenger::new(SystemEnv::new(), name, config.clone(), server.connect(name));
        let inbox = messenger.subscribe().await?;

        let pin = SecretString::from(DEMO_PIN.to_owned());
        messenger.setup_keys(&pin, SetupIntent::FirstTime).await?;

        Ok(Self { messenger, inbox, events })
    }

    async fn receive(&mut self) {
        tokio::time::sleep(DELIVERY_GRACE).await;
        let frames = self.messenger.drain(&mut self.inbox);
        tracing::debug!(user = self.messenger.username(), frames, "drained inbox");
        while let Ok(event) = self.events.try_recv() {
            tracing::debug!(user = self.messenger.username(), ?event, "view event");
        }
    }

    fn report(&self, peer: &str) {
        let Some(view) = self.messenger.conversation(peer) else {
            tracing::warn!(user = self.messenger.username(), peer, "conversation not open");
            return;
        };

        tracing::info!(
            user = self.messenger.username(),
            peer,
            messages = view.messages.len(),
            has_more = view.has_more,
            "conversation"
        );
        for message in &view.messages {
            match &message.content {
                Content::Plaintext(text) => {
                    tracing::info!(from = %message.sender, delivery = ?message.delivery, "{text}");
                },
                Content::Undecryptable { reason } => {
                    tracing::warn!(from = %message.sender, reason, "undecryptable");
                },
                Content::Decrypting => {
                    tracing::info!(from = %message.sender, "decrypting");
                },
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };
    let text = std::fs::read_to_string(path)?;
    Ok(ClientConfig::from_toml_str(&text)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = load_config(args.config.as_deref())?;
    tracing::info!(?config, "veilchat starting");

    let server = SimServer::new();
    let mut first = Participant::sign_up(&server, &args.sender, &config).await?;
    let mut second = Participant::sign_up(&server, &args.recipient, &config).await?;

    first.messenger.open_conversation(&args.recipient).await?;
    second.messenger.open_conversation(&args.sender).await?;

    for round in 1..=args.rounds {
        first.messenger.send(&args.recipient, &format!("ping {round}")).await?;
        second.receive().await;
        second.messenger.send(&args.sender, &format!("pong {round}")).await?;
        first.receive().await;
    }

    first.report(&args.recipient);
    second.report(&args.sender);

    // Re-open from scratch and page back through the stored history.
    first.messenger.close_conversation(&args.recipient);
    first.messenger.open_conversation(&args.recipient).await?;
    let mut pages = 1;
    loop {
        let inserted = first.messenger.fetch_older(&args.recipient).await?;
        if inserted == 0 {
            break;
        }
        pages += 1;
        tracing::info!(inserted, "loaded older page");
    }
    tracing::info!(pages, stored = server.stored_messages().len(), "history walked");

    first.messenger.lock().await;
    second.messenger.lock().await;
    first.receive().await;
    second.receive().await;
    tracing::info!("both vaults locked");

    Ok(())
}
