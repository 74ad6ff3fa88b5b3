//! Parsing of `WWW-Authenticate` / `Proxy-Authenticate` digest challenges

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use rcs_sip_core::{split_header_list, unquote, HeaderAccess, HeaderName, Response, StatusCode};

use crate::error::DialogError;

/// Which header pair a challenge came in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeKind {
    /// 401 / WWW-Authenticate / Authorization
    Www,
    /// 407 / Proxy-Authenticate / Proxy-Authorization
    Proxy,
}

impl ChallengeKind {
    pub fn challenge_header(&self) -> HeaderName {
        match self {
            ChallengeKind::Www => HeaderName::WwwAuthenticate,
            ChallengeKind::Proxy => HeaderName::ProxyAuthenticate,
        }
    }

    pub fn authorization_header(&self) -> HeaderName {
        match self {
            ChallengeKind::Www => HeaderName::Authorization,
            ChallengeKind::Proxy => HeaderName::ProxyAuthorization,
        }
    }
}

/// One `Digest` challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    /// Offered qop values, e.g. `["auth", "auth-int"]`
    pub qop: Vec<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    pub stale: bool,
}

impl DigestChallenge {
    /// Extracts the challenge of a 401 or 407 response
    pub fn from_response(response: &Response) -> Result<(ChallengeKind, Self), DialogError> {
        let kind = match response.status {
            StatusCode::UNAUTHORIZED => ChallengeKind::Www,
            StatusCode::PROXY_AUTHENTICATION_REQUIRED => ChallengeKind::Proxy,
            other => {
                return Err(DialogError::Auth(format!("{} is not a challenge", other)));
            }
        };
        let value = response
            .header(&kind.challenge_header())
            .ok_or_else(|| DialogError::Auth(format!("{} without {}", response.status, kind.challenge_header())))?;
        Ok((kind, value.parse()?))
    }
}

impl FromStr for DigestChallenge {
    type Err = DialogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let params = match s.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("digest") => rest,
            _ => return Err(DialogError::Auth(format!("not a Digest challenge: {}", s))),
        };

        let mut realm = None;
        let mut nonce = None;
        let mut qop = Vec::new();
        let mut opaque = None;
        let mut algorithm = None;
        let mut stale = false;

        for item in split_header_list(params) {
            let Some((name, value)) = item.split_once('=') else {
                continue;
            };
            let value = unquote(value.trim()).to_string();
            match name.trim().to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => {
                    qop = value
                        .split(',')
                        .map(|q| q.trim().to_string())
                        .filter(|q| !q.is_empty())
                        .collect()
                }
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                "stale" => stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        Ok(DigestChallenge {
            realm: realm.ok_or_else(|| DialogError::Auth("challenge without realm".into()))?,
            nonce: nonce.ok_or_else(|| DialogError::Auth("challenge without nonce".into()))?,
            qop,
            opaque,
            algorithm,
            stale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_challenge_with_qop_list() {
        let challenge: DigestChallenge =
            "Digest realm=\"ims.example.com\", nonce=\"abc,def\", qop=\"auth,auth-int\", opaque=\"xyz\", algorithm=MD5, stale=TRUE"
                .parse()
                .unwrap();
        assert_eq!(challenge.realm, "ims.example.com");
        assert_eq!(challenge.nonce, "abc,def");
        assert_eq!(challenge.qop, vec!["auth", "auth-int"]);
        assert_eq!(challenge.opaque.as_deref(), Some("xyz"));
        assert_eq!(challenge.algorithm.as_deref(), Some("MD5"));
        assert!(challenge.stale);
    }

    #[test]
    fn test_reject_other_schemes() {
        assert!("Basic realm=\"x\"".parse::<DigestChallenge>().is_err());
        assert!("Digest realm=\"x\"".parse::<DigestChallenge>().is_err());
    }
}
