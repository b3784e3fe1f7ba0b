//! Server configuration.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Outbound frames buffered per connection before stroke deltas are shed
    pub queue_capacity: usize,
    /// How long an empty room keeps its snapshot before it is destroyed
    pub room_grace: Duration,
    /// Silence after which a connection is dropped
    pub idle_timeout: Duration,
    /// Interval between server pings
    pub ping_interval: Duration,
    /// How long a connection's queue may stay saturated before it is closed
    pub overflow_timeout: Duration,
    /// Interval between sweeps for expired rooms
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3030)),
            queue_capacity: 256,
            room_grace: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(20),
            overflow_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `INKROOM_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Malformed values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let queue_capacity = parse_or(&lookup, "INKROOM_QUEUE_CAPACITY", defaults.queue_capacity);
        Self {
            bind_addr: parse_or(&lookup, "INKROOM_BIND", defaults.bind_addr),
            queue_capacity: if queue_capacity == 0 {
                warn!(
                    "INKROOM_QUEUE_CAPACITY must be positive, using {}",
                    defaults.queue_capacity
                );
                defaults.queue_capacity
            } else {
                queue_capacity
            },
            room_grace: secs_or(&lookup, "INKROOM_ROOM_GRACE_SECS", defaults.room_grace),
            idle_timeout: secs_or(&lookup, "INKROOM_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            ..defaults
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring malformed {}={:?}, using {}", key, raw, default);
                default
            }
        },
    }
}

fn secs_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_or(lookup, key, default.as_secs()))
}
