//! Faultline command line.
//!
//! Loads the client configuration, sends a test event to the configured
//! collector and reports the outcome. Useful for checking credentials and
//! connectivity from a deployment host.

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faultline_client::{install_panic_hook, Client, ClientConfig};
use faultline_core::{Extra, Level, Tags};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "faultline")]
#[command(about = "Send error events to a faultline collector")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./faultline.toml)
    #[arg(short, long, global = true, env = "FAULTLINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a message and wait for it to be delivered
    SendMessage {
        /// Message text
        message: String,

        /// Severity: debug, info, warning, error or fatal
        #[arg(short, long, default_value = "error")]
        level: Level,

        /// Tag in key=value form, repeatable
        #[arg(short, long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,

        /// How long to wait for delivery, in milliseconds
        #[arg(long, default_value_t = 10_000)]
        wait_millis: u64,
    },

    /// Load and validate the configuration without sending anything
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::SendMessage { message, level, tags, wait_millis } => {
            send_message(config, &message, level, tags.into_iter().collect(), wait_millis).await
        },
        Commands::CheckConfig => check_config(&config),
    }
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,faultline=debug"))
        .context("Invalid RUST_LOG environment variable")?;

    // Stdout carries only the event ident.
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<ClientConfig> {
    let config = match path {
        Some(path) => ClientConfig::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ClientConfig::load().context("Failed to load configuration")?,
    };
    Ok(config)
}

async fn send_message(
    config: ClientConfig,
    message: &str,
    level: Level,
    tags: Tags,
    wait_millis: u64,
) -> Result<()> {
    let client = Client::init(config).context("Failed to start error capture")?;
    if !client.is_enabled() {
        warn!("capture is disabled in the configuration, nothing sent");
        return Ok(());
    }
    install_panic_hook(client.clone());

    let Some(event_id) = client.capture_message(message, level, tags, Extra::new()) else {
        bail!("message was not captured");
    };
    info!(event_id = %event_id.ident(), "event captured");

    let flushed = client.flush(Duration::from_millis(wait_millis)).await;
    let stats = client.stats();
    let last_error = client.last_error();
    client.shutdown().await;

    if let Some(last_error) = last_error {
        bail!(
            "collector did not accept the event (status {}): {}",
            last_error.status.map_or_else(|| "none".to_string(), |status| status.to_string()),
            last_error.body
        );
    }
    if flushed.is_none() || stats.delivery.delivered == 0 {
        bail!("event {} was not delivered within {wait_millis}ms", event_id.ident());
    }

    println!("{}", event_id.ident());
    Ok(())
}

fn check_config(config: &ClientConfig) -> Result<()> {
    config.validate().context("Configuration is invalid")?;

    if config.enabled {
        let endpoint = config.endpoint().context("Configuration is invalid")?;
        info!(
            endpoint = %endpoint.url(),
            has_api_key = endpoint.api_key().is_some(),
            batch_size = config.batch_size,
            max_attempts = config.max_attempts,
            "configuration valid"
        );
    } else {
        info!("configuration valid, capture disabled");
    }
    Ok(())
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        },
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_as_key_value() {
        assert_eq!(parse_tag("env=prod"), Ok(("env".to_string(), "prod".to_string())));
        assert_eq!(parse_tag("url=a=b"), Ok(("url".to_string(), "a=b".to_string())));
        assert!(parse_tag("novalue").is_err());
        assert!(parse_tag("=x").is_err());
    }

    #[test]
    fn cli_parses_send_message() {
        let cli = Cli::try_parse_from([
            "faultline",
            "send-message",
            "disk full",
            "--level",
            "warning",
            "--tag",
            "host=db-1",
        ])
        .unwrap();

        match cli.command {
            Commands::SendMessage { message, level, tags, .. } => {
                assert_eq!(message, "disk full");
                assert_eq!(level, Level::Warning);
                assert_eq!(tags, vec![("host".to_string(), "db-1".to_string())]);
            },
            Commands::CheckConfig => panic!("expected send-message"),
        }
    }
}
