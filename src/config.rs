use log::{info, warn};
use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::feed::{DEFAULT_CAPACITY, MAX_CAPACITY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub public_base_url: String,
    pub feed_capacity: usize,
    pub atomic_votes: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:linkvote.db".to_string()),
            bind_addr: try_load(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080))),
            public_base_url: lookup("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            feed_capacity: feed_capacity(try_load(&lookup, "FEED_CAPACITY", DEFAULT_CAPACITY)),
            atomic_votes: try_load(&lookup, "ATOMIC_VOTES", true),
        }
    }
}

// broadcast::channel panics on zero or absurdly large buffers
fn feed_capacity(requested: usize) -> usize {
    let capacity = requested.clamp(1, MAX_CAPACITY);
    if capacity != requested {
        warn!("FEED_CAPACITY {requested} out of range, using {capacity}");
    }
    capacity
}

fn try_load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?} ({e}), using default: {default}");
            default
        }),
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = config_from(&[]);
        assert_eq!(config.database_url, "sqlite:linkvote.db");
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.public_base_url, "http://localhost:8080");
        assert_eq!(config.feed_capacity, DEFAULT_CAPACITY);
        assert!(config.atomic_votes);
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "memory"),
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("PUBLIC_BASE_URL", "https://polls.example"),
            ("FEED_CAPACITY", "8"),
            ("ATOMIC_VOTES", "false"),
        ]);
        assert_eq!(config.database_url, "memory");
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.public_base_url, "https://polls.example");
        assert_eq!(config.feed_capacity, 8);
        assert!(!config.atomic_votes);
    }

    #[test]
    fn bad_values_fall_back() {
        let config = config_from(&[("FEED_CAPACITY", "lots"), ("BIND_ADDR", "nowhere")]);
        assert_eq!(config.feed_capacity, DEFAULT_CAPACITY);
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn feed_capacity_is_clamped() {
        let huge = usize::MAX.to_string();
        let config = config_from(&[("FEED_CAPACITY", huge.as_str())]);
        assert_eq!(config.feed_capacity, MAX_CAPACITY);

        let config = config_from(&[("FEED_CAPACITY", "0")]);
        assert_eq!(config.feed_capacity, 1);
    }
}
