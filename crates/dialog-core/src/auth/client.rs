//! Answering digest challenges on outgoing requests

use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;

use rcs_sip_core::{HeaderAccess, Request, Response};

use super::challenge::{ChallengeKind, DigestChallenge};
use super::credentials::CredentialProvider;
use super::digest::{compute_response, DigestInput, Qop};
use crate::error::{DialogError, DialogResult};

#[derive(Debug, Clone)]
struct ActiveChallenge {
    kind: ChallengeKind,
    challenge: DigestChallenge,
    nonce_count: u32,
}

/// Remembers the last challenge and signs requests with it
pub struct DigestClient {
    provider: Arc<dyn CredentialProvider>,
    active: Mutex<Option<ActiveChallenge>>,
}

impl DigestClient {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            active: Mutex::new(None),
        }
    }

    pub fn provider(&self) -> &Arc<dyn CredentialProvider> {
        &self.provider
    }

    /// Reads the challenge of a 401/407 response; the next [`authorize`]
    /// call answers it.
    ///
    /// [`authorize`]: DigestClient::authorize
    pub fn handle_challenge(&self, response: &Response) -> DialogResult<()> {
        let (kind, challenge) = DigestChallenge::from_response(response)?;
        if self.provider.credentials(&challenge.realm).is_none() {
            return Err(DialogError::Auth(format!(
                "no credentials for realm {}",
                challenge.realm
            )));
        }
        debug!("Stored {:?} challenge for realm {}", kind, challenge.realm);
        *self.active.lock() = Some(ActiveChallenge {
            kind,
            challenge,
            nonce_count: 0,
        });
        Ok(())
    }

    pub fn has_challenge(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Forgets the stored challenge
    pub fn reset(&self) {
        *self.active.lock() = None;
    }

    /// Adds Authorization or Proxy-Authorization to `request` when a
    /// challenge is known. Returns whether a header was added.
    pub fn authorize(&self, request: &mut Request) -> DialogResult<bool> {
        let mut guard = self.active.lock();
        let Some(active) = guard.as_mut() else {
            return Ok(false);
        };
        let credentials = self
            .provider
            .credentials(&active.challenge.realm)
            .ok_or_else(|| DialogError::Auth(format!("no credentials for realm {}", active.challenge.realm)))?;

        active.nonce_count += 1;
        let nc = format!("{:08x}", active.nonce_count);
        let cnonce = format!("{:016x}", rand::thread_rng().gen::<u64>());
        let qop = Qop::select(&active.challenge.qop);
        let method = request.method.to_string();

        let response = compute_response(&DigestInput {
            username: &credentials.username,
            realm: &active.challenge.realm,
            password: &credentials.password,
            method: &method,
            uri: &request.uri,
            nonce: &active.challenge.nonce,
            qop: qop.map(|q| (q, nc.as_str(), cnonce.as_str())),
            body: request.body(),
        });

        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm=MD5",
            credentials.username, active.challenge.realm, active.challenge.nonce, request.uri, response
        );
        if let Some(qop) = qop {
            value.push_str(&format!(", cnonce=\"{}\", qop={}, nc={}", cnonce, qop.as_str(), nc));
        }
        if let Some(opaque) = &active.challenge.opaque {
            value.push_str(&format!(", opaque=\"{}\"", opaque));
        }

        let header = active.kind.authorization_header();
        request.headers.remove(&header);
        request.headers.push(header, value);
        Ok(true)
    }
}

impl std::fmt::Debug for DigestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestClient")
            .field("identity", &self.provider.identity())
            .field("challenged", &self.has_challenge())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;
    use rcs_sip_core::prelude::*;

    fn invite() -> Request {
        SimpleRequestBuilder::new(Method::Invite, "sip:bob@ims.example.com")
            .via("10.0.0.1:5060", "z9hG4bKauth")
            .from(NameAddr::new("sip:alice@ims.example.com").with_tag("a"))
            .to(NameAddr::new("sip:bob@ims.example.com"))
            .call_id("auth-test")
            .cseq(1)
            .build()
    }

    fn client() -> DigestClient {
        DigestClient::new(Arc::new(StaticCredentials::new(
            "sip:alice@ims.example.com",
            "alice@ims.example.com",
            "secret",
        )))
    }

    #[test]
    fn test_proxy_challenge_produces_proxy_authorization() {
        let client = client();
        let mut request = invite();
        assert!(!client.authorize(&mut request).unwrap());

        let challenge = SimpleResponseBuilder::response_from_request(
            &request,
            StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            None,
        )
        .header(
            HeaderName::ProxyAuthenticate,
            "Digest realm=\"ims.example.com\", nonce=\"n1\", qop=\"auth\", opaque=\"o\"",
        )
        .build();
        client.handle_challenge(&challenge).unwrap();

        assert!(client.authorize(&mut request).unwrap());
        let value = request.header(&HeaderName::ProxyAuthorization).unwrap().to_string();
        assert!(value.starts_with("Digest username=\"alice@ims.example.com\""));
        assert!(value.contains("nc=00000001"));
        assert!(value.contains("opaque=\"o\""));
        assert!(request.header(&HeaderName::Authorization).is_none());

        // a second use bumps the nonce count and replaces the header
        assert!(client.authorize(&mut request).unwrap());
        let values = request.headers.get_all(&HeaderName::ProxyAuthorization);
        assert_eq!(values.len(), 1);
        assert!(values[0].contains("nc=00000002"));
    }

    #[test]
    fn test_www_challenge_produces_authorization() {
        let client = client();
        let mut request = invite();
        let challenge = SimpleResponseBuilder::response_from_request(&request, StatusCode::UNAUTHORIZED, None)
            .header(HeaderName::WwwAuthenticate, "Digest realm=\"r\", nonce=\"n\"")
            .build();
        client.handle_challenge(&challenge).unwrap();
        client.authorize(&mut request).unwrap();
        let value = request.header(&HeaderName::Authorization).unwrap();
        assert!(!value.contains("qop="));
    }

    #[test]
    fn test_challenge_without_header_is_an_error() {
        let client = client();
        let bare = SimpleResponseBuilder::response_from_request(
            &invite(),
            StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            None,
        )
        .build();
        assert!(matches!(client.handle_challenge(&bare), Err(DialogError::Auth(_))));
    }
}
