//! `pushwire` command-line client.
//!
//! - `send`: deliver one payload to one or more device tokens
//! - `payload`: render a payload and report its size without connecting
//! - `endpoints`: show the resolved gateway and feedback endpoints

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use pushwire_core::logging::init_subscriber;
use pushwire_core::{DEFAULT_TRUNCATION_FILLER, MAX_PAYLOAD_BYTES, Notification, Payload};
use pushwire_gateway::{Connector, DeliveryEvent, Provider};
use pushwire_settings::{PushwireSettings, load_settings_from_path, settings_path};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Debug, Parser)]
#[command(
    name = "pushwire",
    version,
    about = "Send push notifications over the binary gateway protocol"
)]
struct Cli {
    /// Providers file (defaults to `PUSHWIRE_CONFIG` or `~/.pushwire/providers.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level; overrides the provider's `log_level`. `RUST_LOG` wins over both.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Deliver a payload to device tokens.
    Send(SendArgs),
    /// Print a payload and its size without connecting.
    Payload(PayloadArgs),
    /// Print gateway and feedback endpoints.
    Endpoints {
        /// Only this provider.
        #[arg(long)]
        provider: Option<String>,
    },
}

#[derive(Debug, Args)]
struct SendArgs {
    /// Provider to send through.
    #[arg(long)]
    provider: String,

    /// Hex device token; repeat for several.
    #[arg(long = "token", required = true)]
    tokens: Vec<String>,

    /// Seconds until the gateway may discard the notification.
    #[arg(long)]
    expires_in: Option<i64>,

    #[command(flatten)]
    payload: PayloadArgs,
}

#[derive(Debug, Args)]
struct PayloadArgs {
    /// Alert text.
    #[arg(long)]
    alert: Option<String>,

    /// Badge number.
    #[arg(long)]
    badge: Option<u32>,

    /// Sound name.
    #[arg(long)]
    sound: Option<String>,

    /// Top-level custom field as `key=json`; a value that is not JSON is sent as a string.
    #[arg(long = "custom", value_parser = parse_custom)]
    custom: Vec<(String, Value)>,

    /// Shorten the alert to fit the payload budget.
    #[arg(long, default_value_t = false)]
    truncate: bool,

    /// Text appended to a truncated alert.
    #[arg(long, default_value = DEFAULT_TRUNCATION_FILLER)]
    filler: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(settings_path);

    match cli.command {
        Command::Payload(args) => {
            init_subscriber(cli.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL));
            let payload = build_payload(&args)?;
            print!("{}", describe_payload(&payload));
        }
        Command::Endpoints { provider } => {
            let settings = load(&path)?;
            init_subscriber(cli.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL));
            print!("{}", describe_endpoints(&settings, provider.as_deref())?);
        }
        Command::Send(args) => {
            let settings = load(&path)?;
            let provider_settings = settings.provider(&args.provider)?;
            init_subscriber(
                cli.log_level
                    .as_deref()
                    .unwrap_or(provider_settings.log_level.as_str()),
            );
            send(&args, Provider::from_settings(&args.provider, provider_settings)?).await?;
        }
    }

    Ok(())
}

fn load(path: &std::path::Path) -> Result<PushwireSettings> {
    load_settings_from_path(path)
        .with_context(|| format!("failed to load providers from {}", path.display()))
}

async fn send(args: &SendArgs, provider: Provider) -> Result<()> {
    let payload = Arc::new(build_payload(&args.payload)?);
    let expiration = args
        .expires_in
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
    let notifications = args
        .tokens
        .iter()
        .map(|token| provider.prepare(token, Arc::clone(&payload), expiration))
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        provider = %provider.name(),
        gateway = %provider.gateway_endpoint(),
        notifications = notifications.len(),
        "sending"
    );
    let total = notifications.len();
    let summary = deliver(provider, notifications).await;
    println!("{summary}");

    let undelivered = summary.undelivered(total);
    if undelivered > 0 {
        bail!("{undelivered} of {total} notifications were not delivered");
    }
    Ok(())
}

/// Send everything and tally the outcomes.
///
/// Events are drained while the batch is in flight. The channel closes once
/// the provider is dropped, which ends the tally.
async fn deliver<C: Connector>(
    mut provider: Provider<C>,
    notifications: Vec<Notification>,
) -> Summary {
    let mut events = provider.subscribe();
    let tally = tokio::spawn(async move {
        let mut summary = Summary::default();
        loop {
            match events.recv().await {
                Ok(event) => summary.record(&event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "delivery events were overwritten before they were counted");
                    summary.missed += missed;
                }
                Err(RecvError::Closed) => return summary,
            }
        }
    });

    provider.submit(notifications).await;
    provider.close().await;
    drop(provider);

    tally.await.unwrap_or_default()
}

fn build_payload(args: &PayloadArgs) -> Result<Payload> {
    let mut builder = Payload::builder();
    if let Some(alert) = &args.alert {
        builder = builder.alert(alert.clone());
    }
    if let Some(badge) = args.badge {
        builder = builder.badge(badge);
    }
    if let Some(sound) = &args.sound {
        builder = builder.sound(sound.clone());
    }
    for (key, value) in &args.custom {
        builder = builder.custom(key.clone(), value.clone());
    }

    let mut payload = builder.build()?;
    if args.truncate {
        payload
            .truncate_alert(&args.filler)
            .context("failed to truncate alert")?;
    }
    Ok(payload)
}

fn parse_custom(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn describe_payload(payload: &Payload) -> String {
    let json = String::from_utf8_lossy(&payload.to_json()).into_owned();
    let size = payload.encoded_len();
    let status = if payload.is_within_budget() {
        "within budget".to_string()
    } else {
        format!("over budget by {} bytes", size - MAX_PAYLOAD_BYTES)
    };
    format!("{json}\n{size} of {MAX_PAYLOAD_BYTES} bytes, {status}\n")
}

fn describe_endpoints(settings: &PushwireSettings, only: Option<&str>) -> Result<String> {
    let names: Vec<&str> = match only {
        Some(name) => vec![name],
        None => settings.providers.keys().map(String::as_str).collect(),
    };
    if names.is_empty() {
        bail!("no providers configured");
    }

    let mut out = String::new();
    for name in names {
        let endpoints = settings.provider(name)?.endpoints(name)?;
        out.push_str(&format!(
            "{name}: gateway {} feedback {}\n",
            endpoints.gateway, endpoints.feedback
        ));
    }
    Ok(out)
}

/// Outcome counts for one `send`.
#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    delivered: usize,
    skipped: usize,
    discarded: usize,
    abandoned: usize,
    missed: u64,
}

impl Summary {
    fn record(&mut self, event: &DeliveryEvent) {
        match event {
            DeliveryEvent::Delivered { identifiers } => self.delivered += identifiers.len(),
            DeliveryEvent::Skipped { .. } => self.skipped += 1,
            DeliveryEvent::Discarded { .. } => self.discarded += 1,
            DeliveryEvent::Abandoned { identifiers, .. } => self.abandoned += identifiers.len(),
            DeliveryEvent::RetryScheduled { .. } => {}
        }
    }

    /// Anything not positively reported as delivered counts against the send.
    fn undelivered(&self, total: usize) -> usize {
        total.saturating_sub(self.delivered)
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "delivered {}, rejected {}, discarded {}, dropped {}",
            self.delivered, self.skipped, self.discarded, self.abandoned
        )?;
        if self.missed > 0 {
            write!(f, ", unreported {}", self.missed)?;
        }
        Ok(())
    }
}
