use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::address::{find_param, parse_params, write_params, Params};

/// Magic cookie every RFC 3261 branch starts with
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// A single Via entry: `SIP/2.0/UDP host:port;branch=z9hG4bK...`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Via {
    /// Protocol name and version, e.g. `SIP/2.0`
    pub protocol: String,
    /// Transport token, e.g. `UDP`
    pub transport: String,
    /// `host[:port]`
    pub sent_by: String,
    pub params: Params,
}

impl Via {
    pub fn udp(sent_by: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            protocol: "SIP/2.0".to_string(),
            transport: "UDP".to_string(),
            sent_by: sent_by.into(),
            params: vec![("branch".to_string(), Some(branch.into()))],
        }
    }

    pub fn branch(&self) -> Option<&str> {
        find_param(&self.params, "branch")
    }

    pub fn with_rport(mut self) -> Self {
        self.params.push(("rport".to_string(), None));
        self
    }
}

impl FromStr for Via {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (proto, rest) = s
            .split_once(char::is_whitespace)
            .ok_or_else(|| Error::InvalidHeader(format!("Via without sent-by: '{s}'")))?;
        let (protocol, transport) = proto
            .rsplit_once('/')
            .ok_or_else(|| Error::InvalidHeader(format!("bad Via protocol '{proto}'")))?;
        let rest = rest.trim();
        let (sent_by, params) = match rest.find(';') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        if sent_by.trim().is_empty() {
            return Err(Error::InvalidHeader(format!("Via without sent-by: '{s}'")));
        }
        Ok(Via {
            protocol: protocol.to_string(),
            transport: transport.to_string(),
            sent_by: sent_by.trim().to_string(),
            params: parse_params(params),
        })
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.protocol, self.transport, self.sent_by)?;
        write_params(f, &self.params)
    }
}
