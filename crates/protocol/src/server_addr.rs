use std::fmt;
use std::str::FromStr;

use crate::error::DtailError;

/// Default SSH port used when a discovery entry omits one.
pub const DEFAULT_PORT: u16 = 2222;

/// A `host[:port]` server address, as produced by the discovery methods in
/// spec §4.9 (comma list, file list, or regex-filter predicate).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddr {
    /// Hostname or IP address.
    pub host: String,
    /// SSH port, defaulting to [`DEFAULT_PORT`] when unspecified.
    pub port: u16,
}

impl ServerAddr {
    /// Builds an address from explicit parts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for ServerAddr {
    type Err = DtailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DtailError::Config("empty server address".to_string()));
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port.parse::<u16>().map_err(|_| {
                    DtailError::Config(format!("invalid port in server address '{s}'"))
                })?;
                Ok(Self::new(host, port))
            }
            _ => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parses the comma-separated `--servers` discovery list (spec §4.9, §6).
pub fn parse_server_list(raw: &str) -> Result<Vec<ServerAddr>, DtailError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_only() {
        let addr: ServerAddr = "web1".parse().unwrap();
        assert_eq!(addr.host, "web1");
        assert_eq!(addr.port, DEFAULT_PORT);
    }

    #[test]
    fn parses_host_and_port() {
        let addr: ServerAddr = "web1:2200".parse().unwrap();
        assert_eq!(addr.host, "web1");
        assert_eq!(addr.port, 2200);
    }

    #[test]
    fn rejects_empty() {
        assert!("".parse::<ServerAddr>().is_err());
    }

    #[test]
    fn parses_comma_list() {
        let servers = parse_server_list("web1, web2:2201,web3").unwrap();
        assert_eq!(
            servers,
            vec![
                ServerAddr::new("web1", DEFAULT_PORT),
                ServerAddr::new("web2", 2201),
                ServerAddr::new("web3", DEFAULT_PORT),
            ]
        );
    }

    #[test]
    fn display_round_trips() {
        let addr = ServerAddr::new("web1", 22);
        assert_eq!(addr.to_string(), "web1:22");
    }
}
