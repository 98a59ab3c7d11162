use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::config::{BridgeConfig, Route};
use crate::forward::{ForwardJob, HttpForwarder};

/// Upper bound on concurrently running forwards. When the limit is hit the
/// delivery is dropped with a warning instead of backing up the gateway
/// read loop.
pub const MAX_CONCURRENT_FORWARDS: usize = 100;

/// Identifier stamped into every forwarded envelope.
pub const ENVELOPE_SOURCE: &str = "discord-bridge";

/// Delivery counters, reported at shutdown.
#[derive(Debug, Default)]
struct RouterStats {
    events_received: AtomicU64,
    events_routed: AtomicU64,
    forwards_spawned: AtomicU64,
    forwards_dropped: AtomicU64,
}

/// Matches dispatched events against the route table and fans each match
/// out to its endpoints as detached forwarding tasks. The table is built
/// once from config and never changes during a session.
pub struct Router {
    routes: HashMap<String, Route>,
    forwarder: Arc<HttpForwarder>,
    limiter: Arc<Semaphore>,
    stats: RouterStats,
}

impl Router {
    pub fn new(config: &BridgeConfig, forwarder: Arc<HttpForwarder>) -> Self {
        let routes = config
            .routes
            .iter()
            .map(|route| (route.event_name.clone(), route.clone()))
            .collect();
        Self {
            routes,
            forwarder,
            limiter: Arc::new(Semaphore::new(MAX_CONCURRENT_FORWARDS)),
            stats: RouterStats::default(),
        }
    }

    /// Route one dispatched event. Never blocks: lookups are map hits and
    /// every delivery runs as its own task, racing freely with its peers.
    pub fn dispatch(&self, event_name: &str, data: Value) {
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);

        let Some(route) = self.routes.get(event_name) else {
            tracing::debug!(event = event_name, "no route for event");
            return;
        };
        if !route.enabled {
            tracing::debug!(event = event_name, "route disabled");
            return;
        }

        let envelope = build_envelope(event_name, data);
        self.stats.events_routed.fetch_add(1, Ordering::Relaxed);

        for endpoint in &route.endpoints {
            let Ok(permit) = Arc::clone(&self.limiter).try_acquire_owned() else {
                self.stats.forwards_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event = event_name,
                    url = %endpoint,
                    "forward limit reached, dropping delivery"
                );
                continue;
            };

            let job = ForwardJob {
                event_name: event_name.to_string(),
                url: endpoint.clone(),
                envelope: envelope.clone(),
            };
            let forwarder = Arc::clone(&self.forwarder);
            self.stats.forwards_spawned.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(async move {
                forwarder.forward(job).await;
                drop(permit);
            });
        }
    }

    /// The forward limiter; the supervisor drains it during shutdown to
    /// give in-flight deliveries a grace period.
    pub fn limiter(&self) -> Arc<Semaphore> {
        Arc::clone(&self.limiter)
    }

    pub fn log_stats(&self) {
        tracing::info!(
            events_received = self.stats.events_received.load(Ordering::Relaxed),
            events_routed = self.stats.events_routed.load(Ordering::Relaxed),
            forwards_spawned = self.stats.forwards_spawned.load(Ordering::Relaxed),
            forwards_dropped = self.stats.forwards_dropped.load(Ordering::Relaxed),
            "router statistics"
        );
    }
}

/// The JSON body delivered to endpoints. The timestamp is the dispatch
/// time, not anything read from Discord.
fn build_envelope(event_name: &str, data: Value) -> Value {
    json!({
        "event_type": event_name,
        "data": data,
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "source": ENVELOPE_SOURCE,
    })
}
