use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nostr_core::{
    EventTemplate, Filter, Keys, PayloadCodec, SecretBoxCodec, Tag, KIND_ENCRYPTED_DIRECT_MESSAGE,
    KIND_SHORT_TEXT_NOTE,
};
use relay_client::{RelayClient, RelayConfig};

#[derive(Debug, Parser)]
#[command(name = "relay-tail")]
#[command(about = "Subscribe to a relay and print what it sends")]
struct Args {
    /// Relay URL (falls back to RELAY_URL)
    #[arg(long, env = "RELAY_URL")]
    relay: String,
    #[arg(long)]
    kind: Vec<u64>,
    #[arg(long)]
    author: Vec<String>,
    #[arg(long)]
    since: Option<u64>,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, default_value = "relay-tail")]
    sub_id: String,
    /// Publish this text as a short note before subscribing
    #[arg(long)]
    note: Option<String>,
    /// Send --note as an encrypted direct message to this hex public key
    #[arg(long, requires = "note")]
    dm_to: Option<String>,
    /// Hex secret key used to sign --note (falls back to NOSTR_SECRET_KEY)
    #[arg(long)]
    secret_key: Option<String>,
    /// Key for --dm-to payloads (falls back to NOSTR_SECRETBOX_KEY)
    #[arg(long)]
    secretbox_key: Option<String>,
    #[arg(long, default_value_t = 0)]
    reconnect_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut config = RelayConfig::new(args.relay);
    config.reconnect_delay = Duration::from_millis(args.reconnect_delay_ms);
    let client = RelayClient::new(config)?;

    client.notifications().events.add(|batch| {
        for event in &batch.events {
            match event.as_json() {
                Ok(json) => println!("{} {}", batch.subscription_id, json),
                Err(err) => warn!(error = %err, "Failed to render event"),
            }
        }
    });
    client
        .notifications()
        .notice
        .add(|message| info!(notice = %message, "Relay notice"));
    client
        .notifications()
        .end_of_stored_events
        .add(|subscription_id| info!(subscription_id = %subscription_id, "End of stored events"));

    let cancel = CancellationToken::new();

    if let Some(note) = args.note {
        let keys = match args.secret_key {
            Some(hex) => Keys::parse(&hex)?,
            None => Keys::from_env()?,
        };
        let codec: Option<Box<dyn PayloadCodec>> = match &args.dm_to {
            Some(_) => {
                let key = match args.secretbox_key {
                    Some(key) => key,
                    None => std::env::var("NOSTR_SECRETBOX_KEY")
                        .map_err(|_| "--dm-to needs --secretbox-key or NOSTR_SECRETBOX_KEY")?,
                };
                Some(Box::new(key.parse::<SecretBoxCodec>()?))
            }
            None => None,
        };
        let event = client.sign_and_publish(
            note_template(note, args.dm_to.as_deref()),
            &keys,
            codec.as_deref(),
            &cancel,
        )?;
        info!(event_id = %event.id, kind = event.kind, pubkey = %event.pubkey, "Queued note");
    }

    let mut filter = Filter::new().kinds(args.kind).authors(args.author);
    if let Some(since) = args.since {
        filter = filter.since(since);
    }
    if let Some(limit) = args.limit {
        filter = filter.limit(limit);
    }
    client.create_subscription(args.sub_id, vec![filter], &cancel)?;

    let shutdown = client.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shutdown.disconnect();
        }
    });

    client.connect(&cancel).await?;
    Ok(())
}

/// Short note, or an encrypted direct message tagged with its recipient.
fn note_template(text: String, dm_to: Option<&str>) -> EventTemplate {
    match dm_to {
        Some(recipient) => {
            EventTemplate::new(KIND_ENCRYPTED_DIRECT_MESSAGE, text).tag(Tag::pubkey(recipient))
        }
        None => EventTemplate::new(KIND_SHORT_TEXT_NOTE, text),
    }
}
