// Host address resolution for published ports
// Defaults to loopback; honors a remote daemon set via DOCKER_HOST

use once_cell::sync::Lazy;
use regex::Regex;

/// Address used when no remote docker daemon is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Environment variable describing a remote docker daemon endpoint.
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

static IPV4: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]{1,3}\.){3}[0-9]{1,3}").unwrap());

/// First dotted-decimal IPv4 address embedded in a value, if any.
///
/// Accepts both a bare address (`127.0.0.1`) and a URL-like endpoint
/// (`tcp://192.168.99.100:2376`); scheme and port are discarded.
pub fn extract_ipv4(value: &str) -> Option<&str> {
    IPV4.find(value).map(|m| m.as_str())
}

/// Host on which published ports are reachable.
///
/// `DOCKER_HOST` wins when set and an IPv4 address can be extracted from
/// it; otherwise the loopback default applies, including for a value
/// that carries no recognizable address.
pub fn resolve_host() -> String {
    match std::env::var(DOCKER_HOST_ENV) {
        Ok(value) => extract_ipv4(&value)
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        Err(_) => DEFAULT_HOST.to_string(),
    }
}
