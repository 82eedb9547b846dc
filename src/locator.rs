//! Unicast discovery targets.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Well-known port for unicast lookup discovery.
pub const DEFAULT_PORT: u16 = 4160;

const SCHEME: &str = "jini://";

/// Host and port of a lookup service reached by unicast discovery.
///
/// Hosts are compared case-insensitively, so the host is stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LookupLocator {
    host: String,
    port: u16,
}

impl LookupLocator {
    /// Create a locator, rejecting an empty host or a zero port.
    pub fn new(host: impl AsRef<str>, port: u16) -> Result<Self> {
        let host = host.as_ref().trim();
        if host.is_empty() {
            return Err(Error::invalid("locator host is empty"));
        }
        if port == 0 {
            return Err(Error::invalid(format!("locator {host} has port 0")));
        }
        if host.contains('/')
            || host.contains(char::is_whitespace)
            || host.chars().all(|c| c == ':')
        {
            return Err(Error::invalid(format!("malformed locator host {host:?}")));
        }
        Ok(Self {
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for LookupLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{SCHEME}[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{SCHEME}{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for LookupLocator {
    type Err = Error;

    /// Accepts `jini://host[:port][/]`, `host:port` and bare `host`.
    fn from_str(s: &str) -> Result<Self> {
        let rest = s.trim();
        let rest = match rest.get(..SCHEME.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(SCHEME) => &rest[SCHEME.len()..],
            _ => rest,
        };
        let rest = rest.strip_suffix('/').unwrap_or(rest);

        // Bracketed IPv6 literal.
        if let Some(inner) = rest.strip_prefix('[') {
            let (host, tail) = inner
                .split_once(']')
                .ok_or_else(|| Error::invalid(format!("unterminated IPv6 literal in {s:?}")))?;
            let port = match tail {
                "" => DEFAULT_PORT,
                t => match t.strip_prefix(':') {
                    Some(port) => parse_port(port, s)?,
                    None => {
                        return Err(Error::invalid(format!(
                            "unexpected {t:?} after IPv6 literal in {s:?}"
                        )));
                    }
                },
            };
            return Self::new(host, port);
        }

        match rest.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => Err(Error::invalid(format!(
                "IPv6 literal must be bracketed in {s:?}"
            ))),
            Some((host, port)) => Self::new(host, parse_port(port, s)?),
            None => Self::new(rest, DEFAULT_PORT),
        }
    }
}

fn parse_port(port: &str, input: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|_| Error::invalid(format!("bad port {port:?} in locator {input:?}")))
}
