//! aria2-rpc CLI - talk to an aria2 daemon from the shell.
//!
//! This is the main binary entry point. See the `aria2_rpc` library for the
//! client itself.

use std::time::Duration;

use anyhow::{Context, Result};
use aria2_rpc::transport::ws;
use aria2_rpc::{Aria2, Config, DuplexClient, HttpClient, RpcCaller, RpcNotification};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "aria2-rpc")]
#[command(version = VERSION)]
#[command(about = "Command-line client for the aria2 JSON-RPC interface")]
struct Cli {
    /// RPC endpoint (ws://, wss://, http:// or https://)
    #[arg(long, global = true)]
    url: Option<String>,
    /// aria2 --rpc-secret
    #[arg(long, global = true)]
    secret: Option<String>,
    /// Per-call deadline in milliseconds (0 waits forever)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the daemon version and enabled features
    Version,
    /// Print global download/upload speed and queue counts
    Stat,
    /// Print the status of one download
    Status {
        /// Download GID
        gid: String,
    },
    /// Add a download from one or more URIs
    AddUri {
        /// URIs pointing at the same resource
        #[arg(required = true)]
        uris: Vec<String>,
        /// Wait for the download to complete or fail (WebSocket only)
        #[arg(long)]
        wait: bool,
    },
    /// Call any method with raw JSON params
    Call {
        /// Fully qualified method, e.g. aria2.tellActive
        method: String,
        /// JSON params; an array is sent as-is, anything else as one param
        params: Option<String>,
    },
    /// Print download events until interrupted (WebSocket only)
    Watch,
    /// Print the effective configuration (secret omitted)
    Config,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(url) = cli.url {
        config.rpc_url = url;
    }
    if let Some(secret) = cli.secret {
        config.secret = Some(secret);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Version => {
            let caller = connect_any(&config).await?;
            let version = caller.get_version().await?;
            println!("aria2 {}", version.version);
            if !version.enabled_features.is_empty() {
                println!("features: {}", version.enabled_features.join(", "));
            }
        }
        Commands::Stat => {
            let caller = connect_any(&config).await?;
            let stat = caller.get_global_stat().await?;
            println!(
                "down {} B/s  up {} B/s  active {}  waiting {}  stopped {}",
                stat.download_speed,
                stat.upload_speed,
                stat.num_active,
                stat.num_waiting,
                stat.num_stopped
            );
        }
        Commands::Status { gid } => {
            let caller = connect_any(&config).await?;
            let status = caller.tell_status(&gid, None).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::AddUri { uris, wait } => {
            let uris: Vec<&str> = uris.iter().map(String::as_str).collect();
            if wait {
                add_uri_and_wait(&config, &uris).await?;
            } else {
                let caller = connect_any(&config).await?;
                println!("{}", caller.add_uri(&uris, None, None).await?);
            }
        }
        Commands::Call { method, params } => {
            let params = match params {
                Some(raw) => match serde_json::from_str(&raw).context("params must be JSON")? {
                    Value::Array(items) => items,
                    other => vec![other],
                },
                None => Vec::new(),
            };
            let caller = connect_any(&config).await?;
            let result = caller.call(&method, params).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Watch => watch(&config).await?,
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}

/// Duplex client for ws URLs, HTTP client otherwise.
async fn connect_any(config: &Config) -> Result<Box<dyn RpcCaller>> {
    if ws::is_ws_url(&config.rpc_url) {
        Ok(Box::new(connect_duplex(config).await?))
    } else {
        Ok(Box::new(HttpClient::new(
            config.rpc_url.clone(),
            config.client_options(),
        )?))
    }
}

async fn connect_duplex(config: &Config) -> Result<DuplexClient> {
    if !ws::is_ws_url(&config.rpc_url) {
        anyhow::bail!(
            "events need a WebSocket endpoint (ws:// or wss://), got {}",
            config.rpc_url
        );
    }
    let client = DuplexClient::connect(&config.rpc_url, config.client_options())
        .await
        .with_context(|| format!("Failed to connect to {}", config.rpc_url))?;
    Ok(client)
}

async fn add_uri_and_wait(config: &Config, uris: &[&str]) -> Result<()> {
    let client = connect_duplex(config).await?;
    let (tx, mut rx) = mpsc::unbounded_channel::<(bool, String)>();

    // Register before adding so a fast download cannot finish unobserved.
    for (event, success) in [
        (aria2_rpc::dispatcher::ON_DOWNLOAD_COMPLETE, true),
        (aria2_rpc::dispatcher::ON_BT_DOWNLOAD_COMPLETE, true),
        (aria2_rpc::dispatcher::ON_DOWNLOAD_ERROR, false),
    ] {
        let tx = tx.clone();
        client.on_event(event, move |_client, notification: RpcNotification| {
            if let Some(gid) = notification.gid() {
                let _ = tx.send((success, gid.to_string()));
            }
        });
    }

    let gid = client.add_uri(uris, None, None).await?;
    println!("{gid}");

    drop(tx);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            Some((success, finished)) = rx.recv() => {
                if finished != gid {
                    continue;
                }
                if success {
                    println!("complete");
                    return Ok(());
                }
                let keys = ["errorCode", "errorMessage"];
                let status = client.tell_status(&gid, Some(&keys[..])).await?;
                anyhow::bail!("download {gid} failed: {status}");
            }
            _ = ticker.tick() => {
                if client.is_closed() {
                    anyhow::bail!("connection closed before download {gid} finished");
                }
            }
        }
    }
}

async fn watch(config: &Config) -> Result<()> {
    let client = connect_duplex(config).await?;
    for event in [
        aria2_rpc::dispatcher::ON_DOWNLOAD_START,
        aria2_rpc::dispatcher::ON_DOWNLOAD_PAUSE,
        aria2_rpc::dispatcher::ON_DOWNLOAD_STOP,
        aria2_rpc::dispatcher::ON_DOWNLOAD_COMPLETE,
        aria2_rpc::dispatcher::ON_DOWNLOAD_ERROR,
        aria2_rpc::dispatcher::ON_BT_DOWNLOAD_COMPLETE,
    ] {
        client.on_event(event, |_client, notification: RpcNotification| {
            let short = notification
                .method
                .strip_prefix("aria2.")
                .unwrap_or(&notification.method);
            println!("{short} {}", notification.gid().unwrap_or("-"));
        });
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                if client.is_closed() {
                    anyhow::bail!("connection closed by aria2");
                }
            }
        }
    }
    client.close().await?;
    Ok(())
}
