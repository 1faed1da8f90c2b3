//! rapidnet CLI Client
//!
//! Connects to a server, sends each stdin line and prints what arrives.

use clap::Parser;
use rapidnet::{Client, ClientEvent, Config};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, EnvFilter};

/// rapidnet CLI
#[derive(Parser, Debug)]
#[command(name = "rapidnet-client")]
#[command(about = "Line-oriented client for a rapidnet server")]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Optional client ID
    #[arg(short, long)]
    id: Option<String>,

    /// Connect timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let config = Config::builder().connect_timeout_ms(args.timeout_ms).build();

    let client = match Client::new(config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut events = client.subscribe();
    if let Err(e) = client.connect(&args.host, args.port, args.id).await {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    // Keep the newline so the server sees line boundaries
                    if client.send(&format!("{}\n", line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    eprintln!("stdin: {}", e);
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(ClientEvent::MessageReceived { text }) => print!("{}", text),
                Ok(ClientEvent::Disconnected) => {
                    eprintln!("Disconnected");
                    return;
                }
                Ok(ClientEvent::Exception(e)) => eprintln!("Error: {}", e),
                Ok(ClientEvent::Connected) => {}
                Err(RecvError::Lagged(skipped)) => eprintln!("Missed {} events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.disconnect();
}
