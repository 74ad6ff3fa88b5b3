//! Argument definitions

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use rcs_infra_common::{log_welcome, parse_log_level, setup_logging, LoggingConfig};
use rcs_session_core::{FeatureKind, StackConfig};

use crate::commands;

#[derive(Parser, Debug)]
#[command(name = "rcs", author, version, about = "RCS/IMS SIP client", long_about = None)]
pub struct Cli {
    /// Local UDP address to bind
    #[arg(long, env = "RCS_LOCAL_ADDR", default_value = "0.0.0.0:5060", global = true)]
    pub local: SocketAddr,

    /// Outbound proxy (P-CSCF) every request is sent to
    #[arg(long, env = "RCS_PROXY", global = true)]
    pub proxy: Option<SocketAddr>,

    /// Public identity, e.g. sip:+33600000000@ims.example.com
    #[arg(long, env = "RCS_IDENTITY", global = true)]
    pub identity: Option<String>,

    /// Digest username (defaults to the identity's user part)
    #[arg(long, env = "RCS_USERNAME", global = true)]
    pub username: Option<String>,

    /// Digest password
    #[arg(long, env = "RCS_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "RCS_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Place a voice call
    Call {
        target: String,
        /// Hang up after this many seconds; 0 waits for Ctrl+C
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
    /// Open a one-to-one chat session
    Chat {
        target: String,
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
    /// Share live video
    Share {
        target: String,
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
    /// Send a pager-mode MESSAGE
    Message {
        target: String,
        text: String,
        #[arg(long, default_value = "text/plain")]
        content_type: String,
    },
    /// Watch the presence of a contact until Ctrl+C
    Subscribe {
        target: String,
        /// Requested subscription duration in seconds
        #[arg(long)]
        expires: Option<u32>,
        /// Subscribe to the watcher list instead of presence
        #[arg(long)]
        watchers: bool,
    },
    /// Publish presence from a file until Ctrl+C
    Publish {
        file: PathBuf,
        #[arg(long, default_value = "application/pidf+xml")]
        content_type: String,
    },
    /// Accept every incoming session until Ctrl+C
    Listen,
}

impl Command {
    /// Feature of a session subcommand
    pub fn session_kind(&self) -> Option<FeatureKind> {
        match self {
            Command::Call { .. } => Some(FeatureKind::VoiceCall),
            Command::Chat { .. } => Some(FeatureKind::Chat),
            Command::Share { .. } => Some(FeatureKind::MediaShare),
            _ => None,
        }
    }
}

impl Cli {
    pub fn stack_config(&self) -> Result<StackConfig> {
        let proxy = self.proxy.context("no outbound proxy; pass --proxy or set RCS_PROXY")?;
        let identity = self
            .identity
            .clone()
            .context("no identity; pass --identity or set RCS_IDENTITY")?;
        let mut config = StackConfig::new(self.local, proxy, identity);
        config.username = self.username.clone();
        config.password = self.password.clone();
        Ok(config)
    }

    pub fn logging_config(&self) -> Result<LoggingConfig> {
        let level = parse_log_level(&self.log_level)?;
        let config = LoggingConfig::new(level, "rcs");
        Ok(if self.json_logs { config.with_json() } else { config })
    }

    pub async fn execute(self) -> Result<()> {
        let logging = self.logging_config()?;
        let app_name = logging.app_name.clone();
        setup_logging(logging)?;
        log_welcome(&app_name, env!("CARGO_PKG_VERSION"));

        let config = self.stack_config()?;
        match self.command {
            Command::Call { ref target, duration }
            | Command::Chat { ref target, duration }
            | Command::Share { ref target, duration } => {
                let kind = self.command.session_kind().context("not a session command")?;
                commands::session::execute(config, kind, target, duration).await
            }
            Command::Message {
                ref target,
                ref text,
                ref content_type,
            } => commands::message::execute(config, target, text, content_type).await,
            Command::Subscribe {
                ref target,
                expires,
                watchers,
            } => commands::presence::subscribe(config, target, expires, watchers).await,
            Command::Publish {
                ref file,
                ref content_type,
            } => commands::presence::publish(config, file, content_type).await,
            Command::Listen => commands::listen::execute(config).await,
        }
    }
}
