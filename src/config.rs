//! Environment-driven configuration.
//!
//! Every setting has a default, so a bare `swarmgate` starts a usable
//! gateway on `0.0.0.0:8080` with an empty identity store.

use std::path::PathBuf;
use std::time::Duration;

use crate::irc::server::GatewayConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a whole number of seconds, got {value:?}")]
    InvalidSeconds { var: &'static str, value: String },
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    /// HTTP + WebSocket listener.
    pub web_addr: String,
    /// Optional raw TCP line listener.
    pub irc_bind: Option<String>,
    /// JSON array of agent identities.
    pub agents_file: Option<PathBuf>,
    /// Redis URL for the outbound bridge; no bridge when unset.
    pub redis_url: Option<String>,
    pub bridge_stream_prefix: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        let seconds = |var: &'static str, default: u64| -> Result<Duration, ConfigError> {
            match get(var) {
                None => Ok(Duration::from_secs(default)),
                Some(value) => {
                    let secs = value.trim().parse::<u64>();
                    secs.map(Duration::from_secs)
                        .map_err(|_| ConfigError::InvalidSeconds { var, value })
                }
            }
        };

        let gateway = GatewayConfig {
            server_name: get("SWARM_SERVER_NAME").unwrap_or_else(default_server_name),
            network: get("SWARM_NETWORK").unwrap_or_else(|| "Swarm".into()),
            presence_grace: seconds("SWARM_PRESENCE_GRACE_SECS", 30)?,
            keepalive: seconds("SWARM_KEEPALIVE_SECS", 30)?,
            ..GatewayConfig::default()
        };

        Ok(Self {
            gateway,
            web_addr: get("SWARM_WEB_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            irc_bind: get("SWARM_IRC_BIND"),
            agents_file: get("SWARM_AGENTS_FILE").map(PathBuf::from),
            redis_url: get("SWARM_REDIS_URL"),
            bridge_stream_prefix: get("SWARM_BRIDGE_STREAM_PREFIX")
                .unwrap_or_else(|| "swarm:channel:".into()),
        })
    }
}

/// The machine's hostname when it looks like an FQDN, `swarm.local` otherwise.
fn default_server_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| h.contains('.'))
        .unwrap_or_else(|| "swarm.local".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = from(&[]).unwrap();
        assert_eq!(cfg.web_addr, "0.0.0.0:8080");
        assert_eq!(cfg.irc_bind, None);
        assert_eq!(cfg.redis_url, None);
        assert_eq!(cfg.bridge_stream_prefix, "swarm:channel:");
        assert_eq!(cfg.gateway.network, "Swarm");
        assert_eq!(cfg.gateway.presence_grace, Duration::from_secs(30));
        assert_eq!(cfg.gateway.keepalive, Duration::from_secs(30));
    }

    #[test]
    fn overrides() {
        let cfg = from(&[
            ("SWARM_SERVER_NAME", "hive.example.org"),
            ("SWARM_PRESENCE_GRACE_SECS", "5"),
            ("SWARM_IRC_BIND", "127.0.0.1:6667"),
            ("SWARM_REDIS_URL", " "),
        ])
        .unwrap();
        assert_eq!(cfg.gateway.server_name, "hive.example.org");
        assert_eq!(cfg.gateway.presence_grace, Duration::from_secs(5));
        assert_eq!(cfg.irc_bind.as_deref(), Some("127.0.0.1:6667"));
        assert_eq!(cfg.redis_url, None);
    }

    #[test]
    fn malformed_seconds_rejected() {
        let err = from(&[("SWARM_KEEPALIVE_SECS", "soon")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "SWARM_KEEPALIVE_SECS must be a whole number of seconds, got \"soon\""
        );
    }
}
