//! Presence subscription and publication

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use rcs_dialog_core::{EventPackage, PresencePackage, WatcherInfoPackage};
use rcs_session_core::{ImsCoordinator, StackConfig};

pub async fn subscribe(config: StackConfig, target: &str, expires: Option<u32>, watchers: bool) -> Result<()> {
    let package: Arc<dyn EventPackage> = if watchers {
        Arc::new(WatcherInfoPackage)
    } else {
        Arc::new(PresencePackage)
    };
    let name = package.name().to_string();

    let coordinator = ImsCoordinator::builder(config).build().await?;
    if !coordinator.subscribe(package, target, expires).await {
        coordinator.shutdown().await?;
        bail!("{} subscription to {} refused", name, target);
    }
    info!("Watching {} of {} (press Ctrl+C to stop)", name, target);

    tokio::signal::ctrl_c().await?;
    coordinator.unsubscribe(&name, target).await;
    coordinator.shutdown().await?;
    Ok(())
}

pub async fn publish(config: StackConfig, file: &Path, content_type: &str) -> Result<()> {
    let document = tokio::fs::read(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;

    let coordinator = ImsCoordinator::builder(config).build().await?;
    if !coordinator.publish(content_type, document).await {
        coordinator.shutdown().await?;
        bail!("publication of {} refused", file.display());
    }
    info!("Published {} (press Ctrl+C to withdraw)", file.display());

    tokio::signal::ctrl_c().await?;
    coordinator.shutdown().await?;
    Ok(())
}
