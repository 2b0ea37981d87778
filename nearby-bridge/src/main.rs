// Nearby bridge: JSON-lines method calls on stdin, results and events on stdout,
// backed by the in-process loopback medium with simulated peers.

mod bridge;
mod config;
mod peer;

use anyhow::Context;
use nearby_core::{EventKind, Medium, NearbyClient, Subscription};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("nearby-bridge {}", VERSION);
            return Ok(());
        }
    }

    let filter = EnvFilter::try_from_env("NEARBY_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new().context("starting runtime")?;
    rt.block_on(run(cfg))
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    let medium = Medium::new();
    let mut peers = Vec::new();
    for p in cfg.peers.clone() {
        let name = p.name.clone();
        let task = peer::spawn_peer(&medium, &cfg.client, p)
            .await
            .with_context(|| format!("starting simulated peer {name}"))?;
        peers.push(task);
    }

    let (transport, callbacks) = medium.attach(&cfg.client.service_id);
    info!(station = %transport.endpoint_id(), service_id = %cfg.client.service_id, peers = peers.len(), "bridge ready");
    let client = NearbyClient::with_config(transport, callbacks, &cfg.client);

    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(out_rx));
    let events = tokio::spawn(forward_events(
        client.subscribe_many(&EventKind::ALL),
        out_tx.clone(),
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            res = &mut shutdown => {
                res?;
                info!("shutdown signal");
                break;
            }
        };
        let Some(line) = line else {
            debug!("stdin closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match bridge::parse_line(&line) {
            Ok(request) => bridge::dispatch(&client, request).await,
            Err(response) => response,
        };
        out_tx.send(serde_json::to_string(&response)?)?;
    }

    if let Err(e) = client.stop_all_endpoints().await {
        warn!(error = %e, "stopping endpoints on shutdown");
    }
    events.abort();
    for p in peers {
        p.abort();
    }
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

/// Serialize every application event onto the output stream.
async fn forward_events(mut events: Subscription, out: mpsc::UnboundedSender<String>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => {
                if out.send(line).is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "event not serializable"),
        }
    }
}

/// Single writer so responses and events never interleave mid-line.
async fn write_lines(mut rx: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = rx.recv().await {
        let write = async {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await
        };
        if let Err(e) = write.await {
            warn!(error = %e, "stdout closed");
            break;
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
