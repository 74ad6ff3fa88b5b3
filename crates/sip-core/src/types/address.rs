//! Name-addr values (`From`, `To`, `Contact`, `Route`, ...) and header
//! parameter helpers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// `;name=value` parameters in order; flag parameters have no value
pub type Params = Vec<(String, Option<String>)>;

/// A `"Display" <uri>;params` value
///
/// The URI is kept as text: this stack routes everything through the
/// outbound proxy and never needs a full URI grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: String,
    pub params: Params,
}

impl NameAddr {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            display_name: None,
            uri: uri.into(),
            params: Vec::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.set_param("tag", Some(tag.into()));
        self
    }

    pub fn tag(&self) -> Option<&str> {
        self.param("tag")
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        find_param(&self.params, name)
    }

    /// Sets or replaces a parameter
    pub fn set_param(&mut self, name: &str, value: Option<String>) {
        match self
            .params
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.params.push((name.to_string(), value)),
        }
    }
}

impl FromStr for NameAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidHeader("empty address".to_string()));
        }
        if let Some(lt) = s.find('<') {
            let gt = s[lt..]
                .find('>')
                .map(|i| i + lt)
                .ok_or_else(|| Error::InvalidHeader(format!("unterminated '<' in '{s}'")))?;
            let display = unquote(s[..lt].trim());
            Ok(NameAddr {
                display_name: (!display.is_empty()).then(|| display.to_string()),
                uri: s[lt + 1..gt].trim().to_string(),
                params: parse_params(&s[gt + 1..]),
            })
        } else {
            let (uri, rest) = match s.find(';') {
                Some(i) => (&s[..i], &s[i..]),
                None => (s, ""),
            };
            Ok(NameAddr {
                display_name: None,
                uri: uri.trim().to_string(),
                params: parse_params(rest),
            })
        }
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        write_params(f, &self.params)
    }
}

/// Parses `;a=b;c;d="e f"` (the leading `;` is optional).
pub fn parse_params(s: &str) -> Params {
    s.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), Some(unquote(v.trim()).to_string())),
            None => (p.to_string(), None),
        })
        .collect()
}

/// Case-insensitive parameter lookup; flag parameters yield `Some("")`
pub fn find_param<'a>(params: &'a [(String, Option<String>)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_deref().unwrap_or(""))
}

pub(crate) fn write_params(f: &mut fmt::Formatter<'_>, params: &Params) -> fmt::Result {
    for (k, v) in params {
        match v {
            Some(v) => write!(f, ";{}={}", k, v)?,
            None => write!(f, ";{}", k)?,
        }
    }
    Ok(())
}

/// Strips one pair of surrounding double quotes
pub fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

/// Splits a comma separated header value, ignoring commas inside `<...>`
/// and quoted strings.
pub fn split_header_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_angle = false;
    let mut in_quote = false;
    for c in value.chars() {
        match c {
            '"' => in_quote = !in_quote,
            '<' if !in_quote => in_angle = true,
            '>' if !in_quote => in_angle = false,
            ',' if !in_quote && !in_angle => {
                let item = current.trim();
                if !item.is_empty() {
                    items.push(item.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    let item = current.trim();
    if !item.is_empty() {
        items.push(item.to_string());
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_addr_with_display_and_tag() {
        let addr: NameAddr = "\"Alice\" <sip:alice@example.com>;tag=1928301774"
            .parse()
            .unwrap();
        assert_eq!(addr.display_name.as_deref(), Some("Alice"));
        assert_eq!(addr.uri, "sip:alice@example.com");
        assert_eq!(addr.tag(), Some("1928301774"));
        assert_eq!(
            addr.to_string(),
            "\"Alice\" <sip:alice@example.com>;tag=1928301774"
        );
    }

    #[test]
    fn test_parse_addr_spec_without_brackets() {
        let addr: NameAddr = "sip:bob@example.com;tag=abc".parse().unwrap();
        assert_eq!(addr.uri, "sip:bob@example.com");
        assert_eq!(addr.tag(), Some("abc"));
        assert!("<sip:broken".parse::<NameAddr>().is_err());
    }

    #[test]
    fn test_split_header_list() {
        let items = split_header_list("<sip:p1;lr>, \"a,b\" <sip:p2>,<sip:p3,x>");
        assert_eq!(items, vec!["<sip:p1;lr>", "\"a,b\" <sip:p2>", "<sip:p3,x>"]);
    }

    #[test]
    fn test_flag_params() {
        let params = parse_params(";lr;transport=udp");
        assert_eq!(find_param(&params, "lr"), Some(""));
        assert_eq!(find_param(&params, "TRANSPORT"), Some("udp"));
        assert_eq!(find_param(&params, "maddr"), None);
    }
}
