//! Shared per-stack context
//!
//! Everything a session, subscription or publication needs from the stack,
//! handed to them explicitly at construction.

use std::sync::Arc;
use std::time::Duration;

use rcs_dialog_core::{CredentialProvider, RequestFactory, TransactionManager};
use rcs_sip_core::NameAddr;
use rcs_dialog_core::dialog::generate_tag;

use crate::api::MediaHandler;
use crate::config::{user_part, SessionConfig};
use crate::errors::Result;

pub struct StackContext {
    pub transactions: Arc<TransactionManager>,
    pub factory: RequestFactory,
    pub credentials: Arc<dyn CredentialProvider>,
    pub media: Arc<dyn MediaHandler>,
    pub config: SessionConfig,
    /// Our public identity
    pub identity: String,
    /// Our Contact URI
    pub local_contact: String,
    local_host: String,
}

impl StackContext {
    pub fn new(
        transactions: Arc<TransactionManager>,
        credentials: Arc<dyn CredentialProvider>,
        media: Arc<dyn MediaHandler>,
        config: SessionConfig,
    ) -> Result<Self> {
        let local_addr = transactions.local_addr()?;
        let identity = credentials.identity();
        let factory = RequestFactory::new(local_addr, config.user_agent.clone());
        let local_contact = factory.contact_for(user_part(&identity));
        Ok(Self {
            transactions,
            factory,
            credentials,
            media,
            config,
            identity,
            local_contact,
            local_host: local_addr.ip().to_string(),
        })
    }

    /// IP address put in SDP and Call-IDs
    pub fn local_host(&self) -> &str {
        &self.local_host
    }

    /// Wait ceiling for one exchange
    pub fn transaction_timeout(&self) -> Duration {
        self.transactions.config().transaction_timeout
    }

    /// Our identity as From, with a fresh tag
    pub fn local_party(&self) -> NameAddr {
        NameAddr::new(self.identity.clone()).with_tag(generate_tag())
    }
}

impl std::fmt::Debug for StackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackContext")
            .field("identity", &self.identity)
            .field("local_contact", &self.local_contact)
            .field("transactions", &self.transactions)
            .finish()
    }
}
