//! HTTP Digest MD5 computation (RFC 2617)

use md5::{Digest, Md5};

/// Quality of protection in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qop {
    Auth,
    AuthInt,
}

impl Qop {
    pub fn as_str(&self) -> &'static str {
        match self {
            Qop::Auth => "auth",
            Qop::AuthInt => "auth-int",
        }
    }

    /// Picks `auth` when offered, `auth-int` otherwise
    pub fn select(offered: &[String]) -> Option<Qop> {
        if offered.iter().any(|q| q.eq_ignore_ascii_case("auth")) {
            Some(Qop::Auth)
        } else if offered.iter().any(|q| q.eq_ignore_ascii_case("auth-int")) {
            Some(Qop::AuthInt)
        } else {
            None
        }
    }
}

/// Inputs of one digest response
#[derive(Debug, Clone)]
pub struct DigestInput<'a> {
    pub username: &'a str,
    pub realm: &'a str,
    pub password: &'a str,
    pub method: &'a str,
    pub uri: &'a str,
    pub nonce: &'a str,
    /// `(qop, nc, cnonce)`; absent for RFC 2069 style challenges
    pub qop: Option<(Qop, &'a str, &'a str)>,
    pub body: &'a [u8],
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// `MD5(user:realm:secret)`
pub fn compute_ha1(username: &str, realm: &str, password: &str) -> String {
    md5_hex(format!("{}:{}:{}", username, realm, password).as_bytes())
}

/// `MD5(method:uri)`, with the body hash appended for `auth-int`
pub fn compute_ha2(method: &str, uri: &str, qop: Option<Qop>, body: &[u8]) -> String {
    match qop {
        Some(Qop::AuthInt) => md5_hex(format!("{}:{}:{}", method, uri, md5_hex(body)).as_bytes()),
        _ => md5_hex(format!("{}:{}", method, uri).as_bytes()),
    }
}

/// The `response` parameter value
pub fn compute_response(input: &DigestInput<'_>) -> String {
    let ha1 = compute_ha1(input.username, input.realm, input.password);
    let ha2 = compute_ha2(input.method, input.uri, input.qop.map(|(q, _, _)| q), input.body);
    match input.qop {
        Some((qop, nc, cnonce)) => md5_hex(
            format!("{}:{}:{}:{}:{}:{}", ha1, input.nonce, nc, cnonce, qop.as_str(), ha2).as_bytes(),
        ),
        None => md5_hex(format!("{}:{}:{}", ha1, input.nonce, ha2).as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc2617_example() {
        let input = DigestInput {
            username: "Mufasa",
            realm: "testrealm@host.com",
            password: "Circle Of Life",
            method: "GET",
            uri: "/dir/index.html",
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093",
            qop: Some((Qop::Auth, "00000001", "0a4f113b")),
            body: b"",
        };
        assert_eq!(compute_response(&input), "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn test_without_qop_differs() {
        let mut input = DigestInput {
            username: "alice",
            realm: "ims",
            password: "secret",
            method: "INVITE",
            uri: "sip:bob@ims",
            nonce: "n",
            qop: None,
            body: b"v=0",
        };
        let plain = compute_response(&input);
        assert_eq!(plain.len(), 32);
        input.qop = Some((Qop::AuthInt, "00000001", "c"));
        assert_ne!(compute_response(&input), plain);
    }

    #[test]
    fn test_qop_selection() {
        assert_eq!(Qop::select(&["auth-int".into(), "auth".into()]), Some(Qop::Auth));
        assert_eq!(Qop::select(&["auth-int".into()]), Some(Qop::AuthInt));
        assert_eq!(Qop::select(&[]), None);
    }
}
