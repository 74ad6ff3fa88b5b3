//! Pager-mode MESSAGE

use anyhow::{bail, Result};
use tracing::info;

use rcs_session_core::{ImsCoordinator, StackConfig};

pub async fn execute(config: StackConfig, target: &str, text: &str, content_type: &str) -> Result<()> {
    let coordinator = ImsCoordinator::builder(config).build().await?;
    let delivered = coordinator
        .send_instant_message(target, content_type, text.to_string())
        .await;
    coordinator.shutdown().await?;

    if !delivered {
        bail!("message to {} was not delivered", target);
    }
    info!("Message delivered to {}", target);
    Ok(())
}
