// Relay server configuration, read from the environment.

use std::net::SocketAddr;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`]; every variable has a default
/// suitable for running next to the daemon on one machine.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `tably_relay=debug`).
    pub log_filter: String,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `TABLY_RELAY_HOST` | `127.0.0.1` |
    /// | `TABLY_RELAY_PORT` | `8787` |
    /// | `TABLY_RELAY_CORS_ORIGINS` | *(none, cors.rs uses loopback defaults)* |
    /// | `TABLY_RELAY_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("TABLY_RELAY_HOST").unwrap_or_else(|_| "127.0.0.1".into());
        let port: u16 =
            env("TABLY_RELAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8787);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], port)));

        let cors_origins = env("TABLY_RELAY_CORS_ORIGINS").ok();
        let log_filter = env("TABLY_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, cors_origins, log_filter }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = RelayConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8787");
        assert!(cfg.cors_origins.is_none());
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn custom_host_and_port() {
        let mut m = HashMap::new();
        m.insert("TABLY_RELAY_HOST", "0.0.0.0");
        m.insert("TABLY_RELAY_PORT", "9090");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:9090");
    }

    #[test]
    fn invalid_port_uses_default() {
        let mut m = HashMap::new();
        m.insert("TABLY_RELAY_PORT", "not_a_number");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 8787);
    }

    #[test]
    fn unparseable_host_falls_back_to_loopback() {
        let mut m = HashMap::new();
        m.insert("TABLY_RELAY_HOST", "relay.example.com");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8787");
    }

    #[test]
    fn cors_and_log_filter_overrides() {
        let mut m = HashMap::new();
        m.insert("TABLY_RELAY_CORS_ORIGINS", "chrome-extension://abcdef");
        m.insert("TABLY_RELAY_LOG_FILTER", "debug,tower_http=trace");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.cors_origins.as_deref(), Some("chrome-extension://abcdef"));
        assert_eq!(cfg.log_filter, "debug,tower_http=trace");
    }
}
