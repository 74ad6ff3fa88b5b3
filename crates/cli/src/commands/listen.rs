//! Answer everything

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use rcs_session_core::api::{AutoAcceptHandler, LoggingListener};
use rcs_session_core::{ImsCoordinator, StackConfig};

pub async fn execute(config: StackConfig) -> Result<()> {
    let coordinator = ImsCoordinator::builder(config)
        .with_incoming_handler(Arc::new(AutoAcceptHandler))
        .with_listener(Arc::new(LoggingListener))
        .build()
        .await?;
    info!(
        "Listening on {} as {} (press Ctrl+C to stop)",
        coordinator.local_addr()?,
        coordinator.identity()
    );

    tokio::signal::ctrl_c().await?;
    coordinator.shutdown().await?;
    Ok(())
}
