//! Digest authentication
//!
//! A 401 or 407 answer carries a challenge; [`DigestClient`] stores it and
//! signs the retried request (and later ones) with HTTP Digest MD5, using
//! secrets from a [`CredentialProvider`].

pub mod challenge;
pub mod client;
pub mod credentials;
pub mod digest;

pub use challenge::{ChallengeKind, DigestChallenge};
pub use client::DigestClient;
pub use credentials::{CredentialProvider, Credentials, StaticCredentials};
pub use digest::{compute_ha1, compute_ha2, compute_response, DigestInput, Qop};
