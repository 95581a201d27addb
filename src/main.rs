//! DFA SOAP client operator tool.
//!
//! Run with: `dfa-soap-client --config config.yaml <command>`
//!
//! Offline helpers for working with captured SOAP traffic: classify a fault
//! envelope, rebuild the diagnostic records of a call, or check a config file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dfa_soap_client::config::ClientConfig;
use dfa_soap_client::diagnostics::CallRecorder;
use dfa_soap_client::{classify, parse_fault, CapturedBuffer, ClientSession};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Operator tool for the DFA SOAP client.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log filter, a level or directives such as `info,dfa_soap_client::soap_xml=debug`.
    /// `RUST_LOG` takes precedence when set.
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a SOAP fault envelope and print the resulting error
    Classify {
        /// File holding the fault response XML
        fault: PathBuf,
    },

    /// Rebuild the diagnostic records for a captured call
    Inspect {
        /// Service name (e.g. campaign)
        #[arg(long)]
        service: String,

        /// Method name (e.g. getCampaign)
        #[arg(long)]
        method: String,

        /// File holding the request XML
        #[arg(long)]
        request: PathBuf,

        /// File holding the response XML
        #[arg(long)]
        response: PathBuf,
    },

    /// Validate the configuration file
    CheckConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .with_context(|| format!("Invalid log filter: {}", args.log_level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = load_config(&args.config)?;

    match args.command {
        Command::Classify { fault } => {
            let xml = read(&fault)?;
            let payload = parse_fault(&xml).context("Failed to parse fault envelope")?;
            let err = classify(&payload);
            let kind = if err.is_authentication() {
                "authentication"
            } else {
                "api"
            };
            println!("{}: {}", kind, err);
            if let Some(fault) = err.fault() {
                println!("{}", serde_json::to_string_pretty(fault)?);
            }
        }

        Command::Inspect {
            service,
            method,
            request,
            response,
        } => {
            let buffer = CapturedBuffer::new(read(&request)?, read(&response)?);
            let identity = ClientSession::identity_for(&config.server, &service);
            let recorder = CallRecorder::new(config.server.application_name.clone(), true);
            let diagnostics = recorder.record(&identity, &method, &buffer);
            for record in diagnostics.records() {
                println!("[{}]\n{}\n", record.target, record.message);
            }
        }

        Command::CheckConfig => {
            let creds = config
                .credential_set()
                .context("Invalid credentials section")?;
            if creds.login_secret().is_err() {
                warn!("No usable password or OAuth credential; logins will fail");
            }
            info!(
                username = %creds.username,
                server = %config.server.base_url,
                api_version = %config.server.api_version,
                cached_token = creds.has_token(),
                "Configuration is valid"
            );
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<ClientConfig> {
    if path.exists() {
        info!("Config file: {}", path.display());
        ClientConfig::from_file(path).context("Failed to load config file")
    } else {
        info!("Config file not found, using defaults");
        Ok(ClientConfig::default())
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
