//! A single discovered engine address.

use std::fmt;

use crate::{DiscoveryError, DiscoveryResult};

/// One engine address as reported by a discovery backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entry {
    pub host: String,
    pub port: String,
}

impl Entry {
    /// Parse a `host:port` pair. The port is required.
    pub fn parse(addr: &str) -> DiscoveryResult<Self> {
        let addr = addr.trim();
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !port.is_empty() => Ok(Self {
                host: host.to_string(),
                port: port.to_string(),
            }),
            _ => Err(DiscoveryError::InvalidEntry(addr.to_string())),
        }
    }

    /// Parse a comma-separated list of `host:port` pairs.
    ///
    /// Empty elements are skipped; any malformed element fails the whole
    /// parse.
    pub fn parse_list(list: &str) -> DiscoveryResult<Vec<Self>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_and_port() {
        let entry = Entry::parse("127.0.0.1:2375").unwrap();
        assert_eq!(entry.host, "127.0.0.1");
        assert_eq!(entry.port, "2375");
        assert_eq!(entry.to_string(), "127.0.0.1:2375");
    }

    #[test]
    fn parse_requires_port() {
        assert!(Entry::parse("127.0.0.1").is_err());
        assert!(Entry::parse("").is_err());
        assert!(Entry::parse(":2375").is_err());
    }

    #[test]
    fn parse_list_skips_empty_elements() {
        let entries = Entry::parse_list("a:1,, b:2 ,").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].to_string(), "a:1");
        assert_eq!(entries[1].to_string(), "b:2");
    }

    #[test]
    fn parse_list_fails_on_malformed_element() {
        assert!(Entry::parse_list("a:1,bad").is_err());
    }
}
