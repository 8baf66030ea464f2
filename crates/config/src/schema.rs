use serde::{Deserialize, Serialize};

/// The gateway's full configuration surface (`SPEC_FULL.md` §6 and §8.3).
/// Loaded from a file, then overridden field-by-field from environment
/// variables — the file is optional; every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaygateConfig {
    pub server: ServerConfig,
    pub bus: BusConfig,
    pub cache: CacheConfig,
    pub auth: AuthConfig,
    pub timeouts: TimeoutsConfig,
    /// If true, refuse to start when the bus or cache is unreachable
    /// (process exit code 3). Default is lenient: start degraded.
    pub startup_strict: bool,
}

impl Default for RelaygateConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            bus: BusConfig::default(),
            cache: CacheConfig::default(),
            auth: AuthConfig::default(),
            timeouts: TimeoutsConfig::default(),
            startup_strict: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// WebSocket upgrade path, e.g. `/ws`.
    pub stream_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
            stream_path: "/ws".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub url: String,
    pub request_subject: String,
    pub raw_memory_subject: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            request_subject: relaygate_protocol::DEFAULT_REQUEST_SUBJECT.to_string(),
            raw_memory_subject: relaygate_protocol::DEFAULT_RAW_MEMORY_SUBJECT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub url: String,
    pub hot_msg_limit: usize,
    pub hot_ttl_min: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            hot_msg_limit: 200,
            hot_ttl_min: 60,
        }
    }
}

/// `jwt_secret` is plain text here (file/env layer only); it is wrapped in
/// `secrecy::SecretString` the moment it is handed to the auth verifier so
/// it never appears in a `{:?}` of a live component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_alg: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_alg: "HS256".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub idle_chunk_timeout_secs: u64,
    pub total_ticket_timeout_secs: u64,
    pub drain_timeout_secs: u64,
    pub ws_keepalive_secs: u64,
    pub bus_reconnect_min_secs: u64,
    pub bus_reconnect_max_secs: u64,
    pub http_request_deadline_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            idle_chunk_timeout_secs: 120,
            total_ticket_timeout_secs: 600,
            drain_timeout_secs: 10,
            ws_keepalive_secs: 30,
            bus_reconnect_min_secs: 2,
            bus_reconnect_max_secs: 30,
            http_request_deadline_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = RelaygateConfig::default();
        assert_eq!(cfg.timeouts.idle_chunk_timeout_secs, 120);
        assert_eq!(cfg.timeouts.total_ticket_timeout_secs, 600);
        assert_eq!(cfg.timeouts.drain_timeout_secs, 10);
        assert_eq!(cfg.timeouts.ws_keepalive_secs, 30);
        assert_eq!(cfg.cache.hot_msg_limit, 200);
        assert_eq!(cfg.cache.hot_ttl_min, 60);
        assert!(!cfg.startup_strict);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let cfg = RelaygateConfig::default();
        let toml_str = toml::to_string(&cfg).unwrap();
        let parsed: RelaygateConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.port, cfg.server.port);
    }
}
