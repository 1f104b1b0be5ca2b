use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tunnelrpc_login::{BrowserTransfer, CredentialStore};
use tunnelrpc_proto::ClientConfig;
use tunnelrpc_service::{ClientServiceClient, ClientServiceServer, ClientSettings};

mod applier;
mod settings;

use applier::AgentApplier;
use settings::AgentSettings;

#[derive(Parser, Debug)]
#[command(name = "tunnelrpc-agent")]
#[command(about = "Tunnel agent configuration service")]
#[command(version, long_version = env!("AGENT_LONG_VERSION"))]
struct Cli {
    /// Settings file (YAML); the default locations are searched when unset
    #[arg(long, global = true, env = "TUNNELRPC_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, overrides the settings file (e.g. debug, tunnelrpc=trace)
    #[arg(long, global = true, env = "TUNNELRPC_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept configuration pushes and apply them
    Serve {
        /// Listen address, overrides the settings file
        #[arg(long, env = "TUNNELRPC_LISTEN")]
        listen: Option<String>,
    },

    /// Obtain a client certificate through the browser login flow
    Login {
        /// Print the login URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Push a JSON configuration to a running agent
    Push {
        /// Agent address (e.g., 127.0.0.1:7844)
        #[arg(long)]
        agent: String,

        /// ClientConfig document in JSON
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = AgentSettings::load(cli.config.as_deref())?;

    let log_level = cli.log_level.as_deref().unwrap_or(&settings.log_level);
    setup_logging(log_level);

    match cli.command {
        Commands::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| settings.listen.clone());
            serve(&listen).await
        }
        Commands::Login { no_browser } => login(&settings, no_browser).await,
        Commands::Push { agent, file } => push(&settings, &agent, &file).await,
    }
}

fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

/// Cancelled on Ctrl+C
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
        }
        trigger.cancel();
    });
    token
}

async fn serve(listen: &str) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;

    info!("Agent {} starting", env!("CARGO_PKG_VERSION"));
    let server = ClientServiceServer::new(AgentApplier::new());
    server
        .serve_listener(listener, shutdown_on_ctrl_c())
        .await
        .context("UseConfiguration listener failed")?;

    info!("Agent stopped");
    Ok(())
}

async fn login(settings: &AgentSettings, no_browser: bool) -> Result<()> {
    let store = match &settings.credential_dir {
        Some(dir) => CredentialStore::with_dir(dir),
        None => CredentialStore::new().context("Failed to locate credential directory")?,
    };

    let mut transfer = BrowserTransfer::with_endpoints(&settings.login_url, &settings.store_url)
        .context("Invalid login endpoints")?;
    if no_browser {
        transfer = transfer.without_browser();
    }

    let path = store
        .acquire_certificate(&transfer)
        .await
        .context("Failed to obtain certificate")?;
    println!("Certificate saved to {}", path.display());
    Ok(())
}

async fn push(settings: &AgentSettings, agent: &str, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let config: ClientConfig = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let stream = TcpStream::connect(agent)
        .await
        .with_context(|| format!("Failed to connect to agent at {}", agent))?;
    stream.set_nodelay(true)?;

    let client = ClientServiceClient::new(
        stream,
        ClientSettings {
            call_timeout: Some(settings.call_timeout),
            ..Default::default()
        },
    );

    let result = client
        .use_configuration(&shutdown_on_ctrl_c(), &config)
        .await
        .context("UseConfiguration call failed")?;

    for failed in &result.failed_configs {
        error!(config = failed.config.kind_name(), "{}", failed.reason);
    }
    println!(
        "version {}: success={}, {} failed",
        config.version.0,
        result.success,
        result.failed_configs.len()
    );

    if !result.success {
        anyhow::bail!("Agent did not apply version {}", config.version.0);
    }
    Ok(())
}
