// Published-port table parsing
// Turns raw `docker port` output into internal-port lookups

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// One mapping line: `<internal>/<protocol> -> <host>:<external>`.
///
/// Anything that does not match contributes nothing; the host part between
/// the arrow and the final colon is irrelevant and skipped.
static PORT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]+)/(\S+)\s+->.+?:([0-9]+)").unwrap());

#[derive(Debug, Clone)]
struct Mapping {
    external: u16,
    protocol: String,
}

/// Published ports of one container, keyed by container-internal port.
///
/// Built once from the port listing at launch and never mutated afterwards.
/// Every known internal port carries both its external port and its
/// transport protocol; an internal port absent from the map was simply
/// never published.
#[derive(Debug, Clone, Default)]
pub struct PortMap {
    mappings: HashMap<u16, Mapping>,
}

impl PortMap {
    /// Parse a raw port listing. Pure and infallible: malformed lines are
    /// skipped silently, and empty input yields an empty (present) map.
    ///
    /// A matched port number that does not fit in `u16` skips the match
    /// rather than being clamped to a bogus value. When the same internal
    /// port appears more than once, the last occurrence wins for both the
    /// external port and the protocol.
    pub fn parse(raw: &str) -> PortMap {
        let mut mappings = HashMap::new();

        for captures in PORT_LINE.captures_iter(raw) {
            let internal = captures[1].parse::<u16>();
            let external = captures[3].parse::<u16>();
            if let (Ok(internal), Ok(external)) = (internal, external) {
                mappings.insert(
                    internal,
                    Mapping {
                        external,
                        protocol: captures[2].to_string(),
                    },
                );
            }
        }

        PortMap { mappings }
    }

    /// Externally reachable port for an internal port, if published.
    pub fn external(&self, internal: u16) -> Option<u16> {
        self.mappings.get(&internal).map(|m| m.external)
    }

    /// Transport protocol token for an internal port, verbatim from the
    /// listing (e.g. "tcp", "udp", possibly "tcp6").
    pub fn protocol(&self, internal: u16) -> Option<&str> {
        self.mappings.get(&internal).map(|m| m.protocol.as_str())
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
