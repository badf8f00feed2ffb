//! Top-level blast pipeline: overlaps discovery with the Orchestrator so a
//! renderer starts its `Set`/`Play` attempt the moment it's found, rather
//! than waiting for the whole discovery budget to elapse, all bounded by
//! the run's global time budget, emitting lifecycle events throughout.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::BlastConfig;
use crate::context::NetworkContext;
use crate::discovery::spawn_discovery;
use crate::events::{BlastSummary, EventBus, PipelineEvent};
use crate::orchestrator::{blast_renderer, RendererOutcome, RendererState};

/// Runs one full blast: discover renderers, then set+play the configured
/// clip on each, bounded by `config.total_budget_ms` end to end. A
/// renderer's blast task is spawned as soon as the Discovery Bus admits
/// it, overlapping with the rest of discovery rather than waiting for it.
pub async fn run_blast(
    config: &BlastConfig,
    client: &Client,
    network: &NetworkContext,
    bus: &EventBus,
    cancel: &CancellationToken,
    media_url: &str,
) -> Vec<RendererOutcome> {
    let start = Instant::now();
    let total_deadline = start + Duration::from_millis(config.total_budget_ms);

    bus.publish(PipelineEvent::OriginReady {
        base_url: network.url_builder().base_url(),
    });

    let local_ip = match network.get_ip() {
        std::net::IpAddr::V4(v4) => Some(v4),
        std::net::IpAddr::V6(_) => None,
    };

    let mut discovered_rx = spawn_discovery(config.clone(), client.clone(), local_ip, bus.clone());

    let mut join_set: JoinSet<RendererOutcome> = JoinSet::new();
    let mut outcomes = Vec::new();
    let mut found = 0u32;
    let mut attempted = 0u32;
    let mut channel_open = true;

    while channel_open || !join_set.is_empty() {
        let remaining = total_deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            biased;
            maybe_renderer = discovered_rx.recv(), if channel_open => {
                match maybe_renderer {
                    Some(renderer) => {
                        found += 1;
                        attempted += 1;
                        let client = client.clone();
                        let config = config.clone();
                        let bus = bus.clone();
                        let cancel = cancel.clone();
                        let media_url = media_url.to_string();
                        join_set.spawn(async move {
                            blast_renderer(&client, &config, &bus, &cancel, renderer, &media_url).await
                        });
                    }
                    None => channel_open = false,
                }
            }
            Some(result) = join_set.join_next(), if !join_set.is_empty() => {
                if let Ok(outcome) = result {
                    outcomes.push(outcome);
                }
            }
            _ = tokio::time::sleep(remaining) => {
                break;
            }
        }
    }

    // The budget expired, the run was cancelled, or discovery closed with
    // blasts still in flight: give stragglers `shutdown_grace_ms` to
    // settle before giving up on them.
    if !join_set.is_empty() {
        cancel.cancel();
        let grace = Duration::from_millis(config.shutdown_grace_ms);
        let _ = tokio::time::timeout(grace, async {
            while let Some(result) = join_set.join_next().await {
                if let Ok(outcome) = result {
                    outcomes.push(outcome);
                }
            }
        })
        .await;
        join_set.abort_all();
    }

    let mut succeeded = 0u32;
    let mut failed_by_kind: BTreeMap<String, u32> = BTreeMap::new();
    for outcome in &outcomes {
        match &outcome.state {
            RendererState::Playing => succeeded += 1,
            RendererState::Failed(kind, _) => {
                *failed_by_kind.entry(kind.as_str().to_string()).or_insert(0) += 1;
            }
            _ => {}
        }
    }

    bus.publish(PipelineEvent::Done {
        summary: BlastSummary {
            found,
            attempted,
            succeeded,
            failed_by_kind,
        },
    });

    outcomes
}
