//! rapidnet Server Binary
//!
//! Runs a relay server: every chunk received from one client is sent to all
//! connected clients.

use std::net::IpAddr;

use clap::Parser;
use rapidnet::{Config, Server, ServerEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, EnvFilter};

/// rapidnet relay server
#[derive(Parser, Debug)]
#[command(name = "rapidnet-server")]
#[command(about = "Asynchronous TCP relay server")]
#[command(version)]
struct Args {
    /// Port to listen on (0 picks a free port)
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Local address to bind
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Receive buffer size in bytes
    #[arg(long, default_value = "1024")]
    buffer_size: usize,

    /// Listen backlog
    #[arg(long, default_value = "100")]
    backlog: u32,
}

#[tokio::main]
async fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rapidnet=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("rapidnet server v{}", rapidnet::VERSION);

    let config = Config::builder()
        .bind_addr(args.bind)
        .receive_buffer_size(args.buffer_size)
        .backlog(args.backlog)
        .build();

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut events = server.subscribe();
    if let Err(e) = server.start(args.port) {
        tracing::error!("Failed to start: {}", e);
        std::process::exit(1);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down...");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => handle_event(&server, event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event log fell behind by {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    server.stop().await;
    tracing::info!("Server stopped");
}

fn handle_event(server: &Server, event: ServerEvent) {
    match event {
        ServerEvent::Started { local_addr } => tracing::info!("Listening on {}", local_addr),
        ServerEvent::Stopped => tracing::info!("Stopped"),
        ServerEvent::ClientConnected(connection) => {
            tracing::info!(
                "Client {} joined from {} ({} connected)",
                connection.handle(),
                connection.peer_addr(),
                server.client_count()
            );
        }
        ServerEvent::MessageReceived { connection, text } => {
            tracing::info!("{} says: {}", connection.handle(), text.trim_end());
            let sent = server.send_to_all_detached(&text);
            tracing::debug!("Relayed to {} clients", sent);
        }
        ServerEvent::Disconnected(connection) => {
            tracing::info!("Client {} left", connection.handle());
        }
        ServerEvent::Exception(e) => tracing::warn!("Server fault: {}", e),
    }
}
