//! # parity
//!
//! Parity harness binary: the mock gateway, the three harness roles and the
//! policy bundle rotation tool behind one CLI.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use parity_bundle::{RotationRequest, SigningKey, NEW_KEY_ENV, PREVIOUS_KEY_ENV};
use parity_core::ParityError;
use parity_gateway::GatewayConfig;
use parity_settings::ParitySettings;
use parity_telemetry::{LogFormat, TelemetryConfig};

/// Security decision parity harness.
#[derive(Parser, Debug)]
#[command(name = "parity", about = "Security decision parity harness")]
struct Cli {
    /// JSON settings file (takes precedence over `$PARITY_SETTINGS_PATH`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the mock gateway.
    Gateway {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides settings; 0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Inject the scenario's synthetic actions once the required clients are up.
    Producer,
    /// Wait for the expected decisions and validate them.
    Assertor,
    /// Exit zero if the gateway accepts a connect.
    Healthcheck {
        /// Gateway URL (overrides settings).
        #[arg(long)]
        url: Option<String>,
    },
    /// Write canary/staged/rollback signed policy bundles and a manifest.
    RotateBundle(RotateArgs),
}

#[derive(Args, Debug)]
struct RotateArgs {
    /// Path to the unsigned policy bundle JSON.
    #[arg(long)]
    unsigned: PathBuf,
    /// Directory for the signed artifacts.
    #[arg(long)]
    output_dir: PathBuf,
    /// Key id embedded in the canary and staged bundles.
    #[arg(long)]
    new_key_id: String,
    /// New HMAC secret.
    #[arg(long)]
    new_key: Option<String>,
    #[arg(long, default_value = NEW_KEY_ENV)]
    new_key_env: String,
    /// Previous key id; enables the rollback bundle.
    #[arg(long)]
    previous_key_id: Option<String>,
    #[arg(long)]
    previous_key: Option<String>,
    #[arg(long, default_value = PREVIOUS_KEY_ENV)]
    previous_key_env: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(cli.settings.as_deref()) {
        Ok(settings) => settings,
        Err(error) => {
            eprintln!("parity: {error:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(error) = parity_telemetry::init_telemetry(&telemetry_config(&settings, &cli.command)) {
        eprintln!("parity: {error}");
    }

    match run(cli.command, &settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let kind = error
                .downcast_ref::<ParityError>()
                .map_or("other", ParityError::error_kind);
            tracing::error!(kind, error = %format!("{error:#}"), "parity run failed");
            ExitCode::FAILURE
        }
    }
}

fn load_settings(explicit: Option<&std::path::Path>) -> Result<ParitySettings> {
    match explicit {
        Some(path) => parity_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => parity_settings::load_settings().context("failed to load settings"),
    }
}

fn telemetry_config(settings: &ParitySettings, command: &Command) -> TelemetryConfig {
    let log_level = parity_telemetry::parse_level(&settings.telemetry.log_level)
        .unwrap_or(tracing::Level::INFO);
    let format = settings
        .telemetry
        .format
        .parse::<LogFormat>()
        .unwrap_or_default();
    let component = match command {
        Command::Gateway { .. } => "gateway",
        Command::Producer => "producer",
        Command::Assertor => "assertor",
        Command::Healthcheck { .. } => "healthcheck",
        Command::RotateBundle(_) => "rotate-bundle",
    };
    TelemetryConfig {
        log_level,
        format,
        component: component.to_string(),
        ..TelemetryConfig::default()
    }
}

async fn run(command: Command, settings: &ParitySettings) -> Result<()> {
    match command {
        Command::Gateway { host, port } => run_gateway(settings, host, port).await,
        Command::Producer => {
            let ids = parity_harness::run_producer(settings).await?;
            tracing::info!(count = ids.len(), "producer finished");
            Ok(())
        }
        Command::Assertor => {
            let verdicts = parity_harness::run_assertor(settings).await?;
            tracing::info!(count = verdicts.len(), "all expected decisions matched");
            Ok(())
        }
        Command::Healthcheck { url } => {
            parity_harness::run_healthcheck(settings, url.as_deref()).await?;
            Ok(())
        }
        Command::RotateBundle(args) => rotate_bundle(args),
    }
}

async fn run_gateway(settings: &ParitySettings, host: Option<String>, port: Option<u16>) -> Result<()> {
    let gateway = &settings.gateway;
    let config = GatewayConfig {
        bind_addr: format!(
            "{}:{}",
            host.as_deref().unwrap_or(&gateway.host),
            port.unwrap_or(gateway.port)
        ),
        token: gateway.token.clone(),
        send_queue: gateway.send_queue,
        ping_interval: Duration::from_secs(gateway.ping_interval_secs),
    };

    let handle = parity_gateway::start(config.clone())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %handle.local_addr(), "gateway ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn rotate_bundle(args: RotateArgs) -> Result<()> {
    let new_secret = parity_bundle::resolve_key(
        args.new_key.as_deref(),
        Some(&args.new_key_env),
        "new key",
    )?;
    let previous_key = match args.previous_key_id {
        Some(key_id) => Some(SigningKey {
            secret: parity_bundle::resolve_key(
                args.previous_key.as_deref(),
                Some(&args.previous_key_env),
                "previous key",
            )?,
            key_id,
        }),
        None => None,
    };

    let outcome = parity_bundle::rotate(&RotationRequest {
        unsigned_path: args.unsigned,
        output_dir: args.output_dir,
        new_key: SigningKey {
            key_id: args.new_key_id,
            secret: new_secret,
        },
        previous_key,
    })?;

    let summary = serde_json::json!({
        "ok": true,
        "manifest": outcome.manifest_path.display().to_string(),
        "artifacts": outcome.manifest.artifacts,
    });
    println!("{summary}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rotate_bundle_defaults() {
        let cli = Cli::parse_from([
            "parity",
            "rotate-bundle",
            "--unsigned",
            "bundle.json",
            "--output-dir",
            "out",
            "--new-key-id",
            "k1",
        ]);
        let Command::RotateBundle(args) = cli.command else {
            panic!("expected rotate-bundle");
        };
        assert_eq!(args.new_key_env, NEW_KEY_ENV);
        assert_eq!(args.previous_key_env, PREVIOUS_KEY_ENV);
        assert!(args.previous_key_id.is_none());
    }

    #[test]
    fn settings_flag_is_global() {
        let cli = Cli::parse_from(["parity", "assertor", "--settings", "/tmp/p.json"]);
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/p.json")));
        assert!(matches!(cli.command, Command::Assertor));
    }

    #[test]
    fn telemetry_falls_back_on_bad_values() {
        let mut settings = ParitySettings::default();
        settings.telemetry.log_level = "loud".into();
        settings.telemetry.format = "json".into();
        let config = telemetry_config(&settings, &Command::Producer);
        assert_eq!(config.log_level, tracing::Level::INFO);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.component, "producer");
    }
}
