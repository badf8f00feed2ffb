//! Blast Orchestrator: drives each discovered renderer through
//! `SetAVTransportURI` then `Play`, with independent retry budgets for
//! each SOAP stage and a per-renderer and global time budget.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::config::BlastConfig;
use crate::didl::format_didl_lite;
use crate::discovery::descriptor::fetch_descriptor;
use crate::events::{EventBus, PipelineEvent};
use crate::model::Renderer;
use crate::soap::{play, set_av_transport_uri, SoapError};

/// Terminal or in-progress state of one renderer within a blast run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendererState {
    /// Discovered but not yet attempted.
    New,
    /// Has a resolved AVTransport control URL; ready to attempt `Set`.
    Ready,
    /// `SetAVTransportURI` succeeded; about to attempt `Play`.
    Prepared,
    /// `Play` succeeded.
    Playing,
    /// `Set` failed transiently and is being retried.
    RetrySet(u32),
    /// `Play` failed transiently and is being retried.
    RetryPlay(u32),
    /// Terminal failure; no further attempts will be made.
    Failed(FailureKind, String),
}

impl RendererState {
    /// The failure kind for [`crate::events::BlastSummary::failed_by_kind`]
    /// bucketing, if this is a terminal failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            RendererState::Failed(kind, _) => Some(*kind),
            _ => None,
        }
    }
}

/// Coarse category for a terminal renderer failure, used to bucket
/// [`crate::events::BlastSummary::failed_by_kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No AVTransport control URL could be resolved, even after a lazy
    /// description re-fetch.
    NoControlUrl,
    /// `SetAVTransportURI` failed permanently (exhausted retries or a
    /// non-transient fault).
    SoapSetFailed,
    /// `Play` failed permanently.
    SoapPlayFailed,
    /// `per_device_timeout_ms` elapsed before a terminal outcome.
    PerDeviceTimeout,
    /// The run was cancelled before this renderer reached a terminal state.
    Cancelled,
}

impl FailureKind {
    /// Stable snake_case identifier used as the `failed_by_kind` map key.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NoControlUrl => "no_control_url",
            FailureKind::SoapSetFailed => "soap_set_failed",
            FailureKind::SoapPlayFailed => "soap_play_failed",
            FailureKind::PerDeviceTimeout => "per_device_timeout",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

/// Outcome of driving a single renderer to completion.
#[derive(Debug, Clone)]
pub struct RendererOutcome {
    /// The renderer this outcome describes.
    pub renderer: Renderer,
    /// Final state reached (`Playing` on success, `Failed` otherwise).
    pub state: RendererState,
    /// Milliseconds from this renderer's first attempt to its terminal outcome.
    pub latency_ms: u64,
}

/// Runs a renderer through `Set` -> `Play`, honoring separate retry
/// buckets for each stage and `per_device_timeout_ms` overall.
///
/// `Set` and `Play` are strictly ordered: `Play` is never attempted until
/// `Set` has returned success, even across retries.
pub async fn blast_renderer(
    client: &Client,
    config: &BlastConfig,
    bus: &EventBus,
    cancel: &CancellationToken,
    mut renderer: Renderer,
    media_url: &str,
) -> RendererOutcome {
    let start = Instant::now();
    let deadline = start + Duration::from_millis(config.per_device_timeout_ms);
    let ip = renderer.ip;
    let port = renderer.port;

    let mut state = RendererState::New;
    log::debug!("renderer {ip}:{port} entering {state:?}");

    if !renderer.has_control_url() {
        // The discoverer that found this renderer didn't resolve an
        // AVTransport control URL (e.g. a bare mDNS/port-scan hit with no
        // description fetched yet). Try once, lazily, before giving up.
        match ensure_control_url(client, &mut renderer).await {
            Ok(()) => {}
            Err(reason) => {
                return terminal(renderer, FailureKind::NoControlUrl, reason, bus, start.elapsed());
            }
        }
    }
    state = RendererState::Ready;
    log::debug!("renderer {ip}:{port} entering {state:?}");

    let control_url = renderer
        .av_transport_control_url()
        .expect("control url resolved above")
        .to_string();
    let didl = format_didl_lite(media_url, &clip_title(media_url));

    let set_result = run_with_retry(
        config,
        bus,
        cancel,
        deadline,
        ip,
        port,
        "set",
        FailureKind::SoapSetFailed,
        RendererState::RetrySet,
        &mut state,
        || set_av_transport_uri(client, &control_url, media_url, &didl),
    )
    .await;

    if let Err((kind, reason)) = set_result {
        return terminal(renderer, kind, reason, bus, start.elapsed());
    }
    state = RendererState::Prepared;
    log::debug!("renderer {ip}:{port} entering {state:?}");

    let play_result = run_with_retry(
        config,
        bus,
        cancel,
        deadline,
        ip,
        port,
        "play",
        FailureKind::SoapPlayFailed,
        RendererState::RetryPlay,
        &mut state,
        || play(client, &control_url),
    )
    .await;

    match play_result {
        Ok(()) => {
            let latency_ms = start.elapsed().as_millis() as u64;
            bus.publish(PipelineEvent::RendererOutcome {
                ip,
                port,
                success: true,
                reason: None,
                latency_ms,
            });
            RendererOutcome {
                renderer,
                state: RendererState::Playing,
                latency_ms,
            }
        }
        Err((kind, reason)) => terminal(renderer, kind, reason, bus, start.elapsed()),
    }
}

/// Attempts a description re-fetch against the renderer's best-guess
/// description URL when discovery didn't already resolve an AVTransport
/// control URL. Best-effort: most vendor HTTP servers answer `GET /` with
/// either their UPnP device XML or a JSON status document.
async fn ensure_control_url(client: &Client, renderer: &mut Renderer) -> Result<(), String> {
    let location = format!("http://{}:{}/", renderer.ip, renderer.port);
    let fetched = fetch_descriptor(client, renderer.ip, renderer.port, &location, renderer.source)
        .await
        .map_err(|e| e.to_string())?;

    renderer.control_urls = fetched.control_urls;
    if renderer.friendly_name.is_none() {
        renderer.friendly_name = fetched.friendly_name;
    }
    if renderer.manufacturer.is_none() {
        renderer.manufacturer = fetched.manufacturer;
    }
    if renderer.model.is_none() {
        renderer.model = fetched.model;
    }
    if renderer.device_type.is_none() {
        renderer.device_type = fetched.device_type;
    }

    if renderer.has_control_url() {
        Ok(())
    } else {
        Err("no AVTransport control URL resolved".into())
    }
}

fn terminal(
    renderer: Renderer,
    kind: FailureKind,
    reason: String,
    bus: &EventBus,
    elapsed: Duration,
) -> RendererOutcome {
    let latency_ms = elapsed.as_millis() as u64;
    bus.publish(PipelineEvent::RendererOutcome {
        ip: renderer.ip,
        port: renderer.port,
        success: false,
        reason: Some(reason.clone()),
        latency_ms,
    });
    RendererOutcome {
        renderer,
        state: RendererState::Failed(kind, reason),
        latency_ms,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_with_retry<F, Fut>(
    config: &BlastConfig,
    bus: &EventBus,
    cancel: &CancellationToken,
    deadline: Instant,
    ip: IpAddr,
    port: u16,
    stage: &str,
    stage_kind: FailureKind,
    retry_state: fn(u32) -> RendererState,
    state: &mut RendererState,
    mut action: F,
) -> Result<(), (FailureKind, String)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), SoapError>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err((FailureKind::Cancelled, "cancelled".to_string()));
        }
        if Instant::now() >= deadline {
            return Err((FailureKind::PerDeviceTimeout, format!("per-device timeout during {stage}")));
        }

        bus.publish(PipelineEvent::RendererAttempt {
            ip,
            port,
            stage: stage.to_string(),
            attempt,
        });

        match action().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < config.soap_retry_count => {
                *state = retry_state(attempt);
                log::debug!("renderer {ip}:{port} entering {state:?}");
                let delay = jittered_delay(config.soap_retry_delay_ms(attempt));
                attempt += 1;
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err((FailureKind::Cancelled, "cancelled".to_string())),
                }
            }
            Err(e) => return Err((stage_kind, e.to_string())),
        }
    }
}

/// Applies +/-25% jitter around `base_ms` so retries from many renderers
/// don't all collide on the same retry instant.
fn jittered_delay(base_ms: u64) -> Duration {
    let jitter_fraction = rand::thread_rng().gen_range(-0.25..=0.25);
    let jittered = (base_ms as f64) * (1.0 + jitter_fraction);
    Duration::from_millis(jittered.max(0.0) as u64)
}

fn clip_title(media_url: &str) -> String {
    media_url
        .rsplit('/')
        .next()
        .unwrap_or("blast clip")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_delay_stays_within_25_percent_band() {
        for _ in 0..50 {
            let delay = jittered_delay(1000).as_millis();
            assert!(delay >= 750 && delay <= 1250, "delay {delay} out of band");
        }
    }

    #[test]
    fn clip_title_uses_last_path_segment() {
        assert_eq!(clip_title("http://host/media/current.mp3"), "current.mp3");
    }

    #[test]
    fn failure_kind_as_str_is_stable() {
        assert_eq!(FailureKind::NoControlUrl.as_str(), "no_control_url");
        assert_eq!(FailureKind::SoapSetFailed.as_str(), "soap_set_failed");
        assert_eq!(FailureKind::SoapPlayFailed.as_str(), "soap_play_failed");
        assert_eq!(FailureKind::PerDeviceTimeout.as_str(), "per_device_timeout");
        assert_eq!(FailureKind::Cancelled.as_str(), "cancelled");
    }

    #[test]
    fn renderer_state_failure_kind_is_none_for_non_terminal_states() {
        assert_eq!(RendererState::New.failure_kind(), None);
        assert_eq!(RendererState::Playing.failure_kind(), None);
        assert_eq!(
            RendererState::Failed(FailureKind::SoapSetFailed, "nope".into()).failure_kind(),
            Some(FailureKind::SoapSetFailed)
        );
    }
}
