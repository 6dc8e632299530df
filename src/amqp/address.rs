//! Ordered list of broker addresses to try when connecting.
use std::fmt;
use tracing::warn;

/// The port an AMQP 0-9-1 broker listens on unless told otherwise.
pub const DEFAULT_AMQP_PORT: u16 = 5672;

/// A candidate broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// An address on the standard AMQP port.
    pub fn with_default_port(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_AMQP_PORT)
    }

    /// Parse a fallback entry formatted as `host` or `host:port`.
    ///
    /// Returns `None` for anything else, including ports that are not valid numbers.
    pub fn parse(entry: &str) -> Option<Self> {
        let tokens: Vec<&str> = entry
            .split(':')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .collect();
        match tokens.as_slice() {
            [host] => Some(Self::with_default_port(*host)),
            [host, port] => port.parse().ok().map(|port| Self::new(*host, port)),
            _ => None,
        }
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Build the ordered candidate list: the primary address first, then every parseable fallback
/// in the order it was configured.
///
/// Malformed fallback entries are skipped with a warning.
pub fn resolve_addresses<S: AsRef<str>>(
    host: &str,
    port: u16,
    fallback_addresses: &[S],
) -> Vec<BrokerAddress> {
    let mut addresses = Vec::with_capacity(fallback_addresses.len() + 1);
    addresses.push(BrokerAddress::new(host, port));
    for entry in fallback_addresses {
        let entry = entry.as_ref();
        match BrokerAddress::parse(entry) {
            Some(address) => addresses.push(address),
            None => warn!("Ignoring unparseable fallback address: {}", entry),
        }
    }
    addresses
}
