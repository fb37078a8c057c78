use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use sifter_core::{ProxyConfig, ProxyEngine, ProxyError};
use sifter_observe::{FanoutSink, JsonLinesSink, LineLogSink};
use sifter_policy::Policy;
use sifter_proxy::ProxyServer;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sifter-proxy", version, about = "Filtering HTTP/HTTPS forward proxy")]
struct Args {
    /// Listening port, overriding the configuration file
    port: Option<u16>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Forbidden words file
    #[arg(long, value_name = "FILE")]
    policy: Option<PathBuf>,

    /// Activity log file
    #[arg(long = "log-file", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Interface to listen on
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Machine-readable JSON-lines event log
    #[arg(long = "event-log", value_name = "FILE")]
    event_log: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<ProxyConfig, ProxyError> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|error| ProxyError::ConfigFile {
                path: path.display().to_string(),
                detail: error.to_string(),
            })?;
            serde_json::from_str(&text).map_err(|error| ProxyError::ConfigFile {
                path: path.display().to_string(),
                detail: error.to_string(),
            })?
        }
        None => ProxyConfig::default(),
    };

    if let Some(port) = args.port {
        config.listen_port = port;
    }
    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    if let Some(policy) = &args.policy {
        config.policy_path = policy.display().to_string();
    }
    if let Some(log_file) = &args.log_file {
        config.log_path = log_file.display().to_string();
    }
    if let Some(event_log) = &args.event_log {
        config.event_log_path = Some(event_log.display().to_string());
    }

    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> Result<(), ProxyError> {
    let config = load_config(&args)?;

    let mut sink = FanoutSink::new().attach(Arc::new(LineLogSink::create(&config.log_path)?));
    if let Some(path) = &config.event_log_path {
        sink = sink.attach(Arc::new(JsonLinesSink::create(path)?));
    }

    let loaded = Policy::load(&config.policy_path);
    let engine = ProxyEngine::new(config, Arc::new(loaded.policy), sink)?;
    engine.note_policy_load(&loaded.path, loaded.source_found);

    ProxyServer::new(engine).run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sifter=info,warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "proxy exited");
            ExitCode::FAILURE
        }
    }
}
