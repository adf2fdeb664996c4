// Lab gateway CLI
// Talks to a running gateway: health checks, dev tokens, watching sockets and publishing events

use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use lab_gateway::collab::JwtAuthenticator;

#[derive(Parser)]
#[command(name = "lab-cli")]
#[command(about = "Lab gateway CLI", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8000)
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Mint an access token for local testing
    Token {
        /// User ID carried in the token
        #[arg(short, long)]
        user_id: i64,

        /// Signing secret, must match the server's JWT_SECRET
        #[arg(long, env = "JWT_SECRET", default_value = "dev-secret-change-me")]
        secret: String,

        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },

    /// Watch a batch as a monitor (press Ctrl+C to exit)
    Monitor {
        /// Batch to watch
        #[arg(short, long)]
        batch_id: i64,

        #[arg(short, long)]
        token: String,

        /// Send one manual override after connecting: <student_id>:<online|offline>
        #[arg(long)]
        set_status: Option<String>,
    },

    /// Connect as a student and print every event received (press Ctrl+C to exit)
    Student {
        #[arg(short, long)]
        token: String,
    },

    /// Publish an event through /internal/publish
    Publish {
        /// Target group, e.g. batch_7 or monitor_batch_7
        #[arg(short, long)]
        group: String,

        /// Event JSON, e.g. '{"type":"task_event",...}'
        #[arg(short, long)]
        event: String,

        /// Publish API key, must match the server's PUBLISH_API_KEY
        #[arg(short, long, env = "PUBLISH_API_KEY")]
        key: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Token { user_id, secret, ttl } => {
            issue_token(*user_id, secret, *ttl);
        }
        Commands::Monitor {
            batch_id,
            token,
            set_status,
        } => {
            let url = format!(
                "ws://{}/ws/monitor/{}/?token={}",
                cli.server,
                batch_id,
                urlencoding::encode(token)
            );
            let opening = match set_status.as_deref().map(status_update) {
                Some(Ok(message)) => Some(message),
                Some(Err(e)) => {
                    println!("{} {}", "✗".red(), e);
                    return;
                }
                None => None,
            };
            watch(&url, opening).await;
        }
        Commands::Student { token } => {
            let url = format!("ws://{}/ws/student/?token={}", cli.server, urlencoding::encode(token));
            watch(&url, None).await;
        }
        Commands::Publish { group, event, key } => {
            publish(&cli.server, group, event, key).await;
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                    println!("  Connections: {}", body["connections"]);
                    println!("  Groups: {}", body["groups"]);
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

fn issue_token(user_id: i64, secret: &str, ttl: u64) {
    match JwtAuthenticator::new(secret).issue_access_token(user_id, Duration::from_secs(ttl)) {
        Ok(token) => {
            println!("{} Token for user {} (valid {}s)", "✓".green(), user_id, ttl);
            println!("{}", token);
        }
        Err(e) => println!("{} Failed to issue token: {}", "✗".red(), e),
    }
}

fn status_update(raw: &str) -> Result<String, String> {
    let (student_id, status) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected <student_id>:<status>, got {}", raw))?;
    let student_id: i64 = student_id
        .parse()
        .map_err(|_| format!("invalid student id: {}", student_id))?;
    if status != "online" && status != "offline" {
        return Err(format!("status must be online or offline, got {}", status));
    }

    Ok(serde_json::json!({
        "type": "status_update",
        "student_id": student_id,
        "status": status,
    })
    .to_string())
}

async fn watch(url: &str, opening: Option<String>) {
    println!("{}", "Connecting...".cyan());

    let (ws_stream, _) = match connect_async(url).await {
        Ok(conn) => conn,
        Err(e) => {
            println!("{} WebSocket connection failed: {}", "✗".red(), e);
            return;
        }
    };
    println!("{} Connected, waiting for events", "✓".green());

    let (mut write, mut read) = ws_stream.split();

    if let Some(message) = opening {
        if write.send(Message::Text(message)).await.is_err() {
            println!("{} Failed to send status update", "✗".red());
            return;
        }
        println!("{} Status update sent", "✓".green());
    }

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => print_event(&text),
                Some(Ok(Message::Close(_))) | None => {
                    println!("{} Connection closed by server", "✗".yellow());
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    println!("{} Error receiving message: {}", "✗".red(), e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                let _ = write.send(Message::Close(None)).await;
                println!("\n{}", "Disconnected".cyan());
                break;
            }
        }
    }
}

fn print_event(text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(event) => {
            let kind = event["type"].as_str().unwrap_or("unknown").to_string();
            println!("\n{} {}", "◆".blue(), kind.bold());
            println!("{}", serde_json::to_string_pretty(&event).unwrap_or_else(|_| text.to_string()));
        }
        Err(_) => println!("{} {}", "?".yellow(), text),
    }
}

async fn publish(server: &str, group: &str, event: &str, key: &str) {
    let event: serde_json::Value = match serde_json::from_str(event) {
        Ok(event) => event,
        Err(e) => {
            println!("{} Event is not valid JSON: {}", "✗".red(), e);
            return;
        }
    };

    let url = format!("http://{}/internal/publish", server);
    let client = reqwest::Client::new();
    let body = serde_json::json!({ "group": group, "event": event });

    match client.post(&url).bearer_auth(key).json(&body).send().await {
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            if status.is_success() {
                println!("{} Event queued for {}", "✓".green(), group);
            } else {
                println!("{} Publish failed: {} {}", "✗".red(), status, body);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}
