use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1024;
pub const DEFAULT_COLLABORATOR_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub gateway: GatewayConfig,
    /// Optional JSON file used to seed the in-memory roster
    pub roster_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Bearer key for the HTTP publish endpoint; the endpoint is disabled without one
    pub publish_api_key: Option<String>,
}

/// Tuning knobs for the real-time core
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
    /// Capacity of the producer outbox
    pub outbox_capacity: usize,
    /// Bound on every collaborator call (auth, profile, snapshot, presence write)
    pub collaborator_timeout: Duration,
    /// Bound on flushing a closing socket's queued frames
    pub close_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            collaborator_timeout: Duration::from_millis(DEFAULT_COLLABORATOR_TIMEOUT_MS),
            close_timeout: Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", DEFAULT_PORT),
            },
            auth: AuthConfig {
                jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| {
                    tracing::warn!("JWT_SECRET not set, using development secret");
                    DEFAULT_JWT_SECRET.to_string()
                }),
                publish_api_key: env::var("PUBLISH_API_KEY").ok().filter(|k| !k.is_empty()),
            },
            gateway: GatewayConfig {
                outbound_buffer: parse_var("OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER).max(1),
                outbox_capacity: parse_var("OUTBOX_CAPACITY", DEFAULT_OUTBOX_CAPACITY).max(1),
                collaborator_timeout: Duration::from_millis(parse_var(
                    "COLLABORATOR_TIMEOUT_MS",
                    DEFAULT_COLLABORATOR_TIMEOUT_MS,
                )),
                close_timeout: Duration::from_millis(parse_var(
                    "CLOSE_TIMEOUT_MS",
                    DEFAULT_CLOSE_TIMEOUT_MS,
                )),
            },
            roster_path: env::var("ROSTER_PATH").ok().filter(|p| !p.is_empty()),
        }
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

/// Reads and parses an environment variable, warning and falling back on bad input
fn parse_var<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => parse_or_default(name, &raw, default),
        Err(_) => default,
    }
}

fn parse_or_default<T: FromStr + Copy + std::fmt::Display>(name: &str, raw: &str, default: T) -> T {
    raw.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(variable = name, value = raw, default = %default, "Invalid value, using default");
        default
    })
}
