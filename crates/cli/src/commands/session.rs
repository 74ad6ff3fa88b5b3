//! Call, chat and share: one outgoing session

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::info;

use rcs_session_core::api::LoggingListener;
use rcs_session_core::{FeatureKind, ImsCoordinator, SessionState, StackConfig};

pub async fn execute(config: StackConfig, kind: FeatureKind, target: &str, duration: u64) -> Result<()> {
    let coordinator = ImsCoordinator::builder(config)
        .with_listener(Arc::new(LoggingListener))
        .build()
        .await?;

    info!("Starting {} session with {}", kind, target);
    let handle = coordinator.create_session_of_kind(kind, target).await?;
    let state = tokio::select! {
        state = handle.settled() => state,
        _ = tokio::signal::ctrl_c() => {
            handle.terminate().await?;
            handle.ended().await
        }
    };
    if state != SessionState::Established {
        coordinator.shutdown().await?;
        match handle.error() {
            Some(error) => bail!("session not established: {}", error),
            None => bail!("session ended as {}", state),
        }
    }

    if duration > 0 {
        info!("Session active for {}s", duration);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(duration)) => {}
            _ = handle.ended() => {}
        }
    } else {
        info!("Session active (press Ctrl+C to hang up)");
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = handle.ended() => {}
        }
    }

    handle.terminate().await?;
    coordinator.shutdown().await?;
    Ok(())
}
