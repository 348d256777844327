use std::fmt;
use std::str::FromStr;

/// NodeAddr is a node's externally reachable `(host, port)`. Its `Display` form, `host:port`, is
/// what a node writes as its membership payload.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct NodeAddr {
    host: String,
    port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        NodeAddr {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn to_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseNodeAddrError {
    #[error("missing ':' separator in '{0}'")]
    MissingSeparator(String),
    #[error("empty host in '{0}'")]
    EmptyHost(String),
    #[error("invalid port in '{0}'")]
    InvalidPort(String),
}

impl FromStr for NodeAddr {
    type Err = ParseNodeAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // rsplit so that the port is always the last segment.
        let mut parts = s.trim().rsplitn(2, ':');
        let port = parts.next().unwrap_or_default();
        let host = parts
            .next()
            .ok_or_else(|| ParseNodeAddrError::MissingSeparator(s.to_string()))?;

        if host.is_empty() {
            return Err(ParseNodeAddrError::EmptyHost(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseNodeAddrError::InvalidPort(s.to_string()))?;

        Ok(NodeAddr::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_membership_payload() {
        let addr: NodeAddr = "10.0.0.7:9090".parse().unwrap();
        assert_eq!(addr, NodeAddr::new("10.0.0.7", 9090));
        assert_eq!(addr.to_string(), "10.0.0.7:9090");
        assert_eq!(addr.to_url(), "http://10.0.0.7:9090");
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(
            "localhost".parse::<NodeAddr>(),
            Err(ParseNodeAddrError::MissingSeparator("localhost".into()))
        );
        assert_eq!(
            ":80".parse::<NodeAddr>(),
            Err(ParseNodeAddrError::EmptyHost(":80".into()))
        );
        assert_eq!(
            "host:99999".parse::<NodeAddr>(),
            Err(ParseNodeAddrError::InvalidPort("host:99999".into()))
        );
    }
}
