//! Credential provider collaborator

use std::collections::HashMap;

/// Username and secret for one realm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Supplies the local identity and the secrets used to answer challenges
pub trait CredentialProvider: Send + Sync {
    /// Public identity, e.g. `sip:+33600000000@ims.example.com`
    fn identity(&self) -> String;

    /// Credentials for `realm`, if any
    fn credentials(&self, realm: &str) -> Option<Credentials>;
}

/// Fixed identity with one default credential and optional per-realm ones
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    identity: String,
    default: Credentials,
    per_realm: HashMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn new(identity: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            default: Credentials::new(username, password),
            per_realm: HashMap::new(),
        }
    }

    pub fn with_realm(mut self, realm: impl Into<String>, credentials: Credentials) -> Self {
        self.per_realm.insert(realm.into(), credentials);
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn credentials(&self, realm: &str) -> Option<Credentials> {
        Some(self.per_realm.get(realm).unwrap_or(&self.default).clone())
    }
}
