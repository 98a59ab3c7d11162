use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::{broadcast, mpsc};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::forward::HttpForwarder;
use crate::gateway::{DispatchEvent, GatewayClient};
use crate::router::{Router, MAX_CONCURRENT_FORWARDS};

/// How long in-flight forwards get to finish once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Wire everything together and run until a shutdown signal or a fatal
/// gateway error. Returns `Err` only for fatal close codes; `main` maps
/// that to a non-zero exit.
pub async fn run(config: BridgeConfig) -> Result<(), BridgeError> {
    let forwarder = Arc::new(HttpForwarder::new(&config.http)?);
    let router = Arc::new(Router::new(&config, forwarder));

    if config.routes.is_empty() {
        tracing::warn!("no routes configured, events will be received but not forwarded");
    }
    for route in &config.routes {
        if route.enabled {
            tracing::info!(
                event = %route.event_name,
                endpoints = route.endpoints.len(),
                "route enabled"
            );
        } else {
            tracing::info!(event = %route.event_name, "route disabled");
        }
    }

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<DispatchEvent>();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Dispatch pump: the single consumer keeps events flowing into the
    // router in the order the gateway received them. It ends on its own
    // once the gateway client (the only sender) is gone.
    let pump_router = Arc::clone(&router);
    let pump = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            pump_router.dispatch(&event.name, event.data);
        }
    });

    let mut gateway = GatewayClient::new(config.discord.clone(), events_tx);
    let gateway_shutdown = shutdown_tx.clone();
    let mut gateway_task = tokio::spawn(async move { gateway.run(&gateway_shutdown).await });

    let result = tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut gateway_task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    tracing::error!("gateway task failed: {e}");
                    Ok(())
                }
                Err(_) => {
                    tracing::warn!("gateway did not close in time, aborting");
                    gateway_task.abort();
                    Ok(())
                }
            }
        }
        result = &mut gateway_task => match result {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("gateway task failed: {e}");
                Ok(())
            }
        },
    };

    // The gateway is gone, so the pump drains whatever is queued and ends.
    let _ = pump.await;

    // Give in-flight forwards the rest of the grace period.
    let limiter = router.limiter();
    match tokio::time::timeout(
        SHUTDOWN_GRACE,
        limiter.acquire_many(MAX_CONCURRENT_FORWARDS as u32),
    )
    .await
    {
        Ok(_) => {}
        Err(_) => tracing::warn!("grace period elapsed with forwards still in flight"),
    }

    router.log_stats();
    result
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
