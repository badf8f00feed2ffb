//! Pipeline events and the broadcast bus that carries them to subscribers
//! (HTTP SSE/WS endpoints, logs, tests).

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::RendererSource;

/// One observable occurrence during a blast run, emitted on the shared bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    /// The Media Origin finished binding and is ready to serve the clip.
    OriginReady {
        /// Base URL renderers should resolve clip URLs against.
        base_url: String,
    },
    /// A discoverer reported progress (not necessarily a new renderer).
    DiscoveryProgress {
        /// Which discoverer produced this update.
        source: RendererSource,
        /// Renderers found by this source so far in the current run.
        found_so_far: u32,
    },
    /// The Discovery Bus admitted a new, previously-unseen renderer.
    RendererFound {
        /// Renderer's IP address.
        ip: IpAddr,
        /// Renderer's port.
        port: u16,
        /// Human-readable name, if known at discovery time.
        friendly_name: Option<String>,
        /// Which discoverer found it first.
        source: RendererSource,
    },
    /// The Orchestrator is about to attempt (or retry) a SOAP call against a renderer.
    RendererAttempt {
        /// Renderer's IP address.
        ip: IpAddr,
        /// Renderer's port.
        port: u16,
        /// `"set"` or `"play"`.
        stage: String,
        /// Zero-indexed attempt number within that stage's retry bucket.
        attempt: u32,
    },
    /// A renderer reached a terminal state for this run.
    RendererOutcome {
        /// Renderer's IP address.
        ip: IpAddr,
        /// Renderer's port.
        port: u16,
        /// `true` if playback was successfully started.
        success: bool,
        /// Human-readable failure reason, if `success` is `false`.
        reason: Option<String>,
        /// Milliseconds from this renderer's first attempt to its terminal outcome.
        latency_ms: u64,
    },
    /// The run has finished: budget expired, all renderers settled, or cancelled.
    Done {
        /// Run-wide counters summarizing what happened.
        summary: BlastSummary,
    },
}

/// Run-wide counters published with [`PipelineEvent::Done`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlastSummary {
    /// Renderers the Discovery Bus admitted during this run.
    pub found: u32,
    /// Renderers actually handed to the Orchestrator for a blast attempt.
    pub attempted: u32,
    /// Renderers that reached `Playing`.
    pub succeeded: u32,
    /// Renderers that reached `Failed`, grouped by failure kind (e.g.
    /// `"per_device_timeout"`, `"soap_set_failed"`) with a count each.
    pub failed_by_kind: BTreeMap<String, u32>,
}

/// Broadcast bus for [`PipelineEvent`]s.
///
/// Wraps a `tokio::sync::broadcast::Sender` so publishers don't need to
/// care whether anyone is currently subscribed — a send with no receivers
/// is a routine, logged-at-trace occurrence, not an error.
#[derive(Clone)]
pub struct EventBus {
    tx: Arc<broadcast::Sender<PipelineEvent>>,
}

impl EventBus {
    /// Creates a new bus with the given channel capacity (oldest events are
    /// dropped for subscribers that fall behind).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribes to future events. Missed-message lag is surfaced to the
    /// subscriber by `broadcast::Receiver` itself as `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. A "no active receivers" error is expected and
    /// harmless when nobody is currently subscribed.
    pub fn publish(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("pipeline event published with no active subscribers");
        }
    }

    /// Number of currently active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let mut failed_by_kind = BTreeMap::new();
        failed_by_kind.insert("per_device_timeout".to_string(), 1);
        bus.publish(PipelineEvent::Done {
            summary: BlastSummary {
                found: 2,
                attempted: 2,
                succeeded: 1,
                failed_by_kind,
            },
        });
        let event = rx.recv().await.unwrap();
        match event {
            PipelineEvent::Done { summary } => {
                assert_eq!(summary.found, 2);
                assert_eq!(summary.succeeded, 1);
                assert_eq!(summary.failed_by_kind.get("per_device_timeout"), Some(&1));
            }
            _ => panic!("unexpected event variant"),
        }
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.publish(PipelineEvent::RendererFound {
            ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)),
            port: 1400,
            friendly_name: None,
            source: RendererSource::Ssdp,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
