//! HTTP trigger surface: the small control API used to kick off a blast,
//! separate from the Media Origin's clip-serving routes.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::BlastConfig;
use crate::context::NetworkContext;
use crate::error::PipelineError;
use crate::events::EventBus;
use crate::model::{ClipSource, EvaluationContext};
use crate::orchestrator::RendererOutcome;
use crate::pipeline::run_blast;
use crate::rules::{evaluate, RuleStore};
use crate::utils::now_millis;
use crate::MediaOrigin;

/// Shared state for the trigger API's handlers.
#[derive(Clone)]
pub struct ApiState {
    /// Blast run tunables.
    pub config: BlastConfig,
    /// HTTP client reused for SOAP/description/proxy calls.
    pub client: Client,
    /// Network identity for the Media Origin.
    pub network: NetworkContext,
    /// The Media Origin, for setting the active clip before blasting.
    pub origin: MediaOrigin,
    /// Event bus blast runs publish to.
    pub bus: EventBus,
    /// Cancellation token for in-flight runs.
    pub cancel: CancellationToken,
    /// Rule persistence, consulted by `/blast/auto`.
    pub rule_store: RuleStore,
}

/// Request body for `POST /blast/run-clip`.
#[derive(Debug, Deserialize)]
pub struct RunClipRequest {
    /// The clip to set on the Media Origin before blasting.
    pub clip: ClipSource,
}

/// Response body summarizing a finished blast run.
#[derive(Debug, Serialize)]
pub struct BlastResponse {
    /// Number of renderers that reached a terminal state.
    pub total: usize,
    /// Number of renderers that started playback successfully.
    pub succeeded: usize,
}

fn summarize(outcomes: &[RendererOutcome]) -> BlastResponse {
    let succeeded = outcomes
        .iter()
        .filter(|o| matches!(o.state, crate::orchestrator::RendererState::Playing))
        .count();
    BlastResponse {
        total: outcomes.len(),
        succeeded,
    }
}

/// `POST /blast/start` — blasts whatever clip is already configured on the
/// Media Origin.
async fn start_blast(State(state): State<Arc<ApiState>>) -> Response {
    let media_url = match state.origin.get_media_url() {
        Ok(url) => url,
        Err(e) => return e.into_response(),
    };
    let outcomes = run_blast(&state.config, &state.client, &state.network, &state.bus, &state.cancel, &media_url).await;
    Json(summarize(&outcomes)).into_response()
}

/// `POST /blast/run-clip` — sets the given clip then blasts it.
async fn run_clip(State(state): State<Arc<ApiState>>, Json(req): Json<RunClipRequest>) -> Response {
    if let Err(e) = state.origin.set_clip(req.clip) {
        return e.into_response();
    }
    start_blast(State(state)).await
}

/// `POST /blast/discover-only` — runs discovery without issuing any SOAP
/// calls, useful for diagnostics.
async fn discover_only(State(state): State<Arc<ApiState>>) -> Response {
    let local_ip = match state.network.get_ip() {
        std::net::IpAddr::V4(v4) => Some(v4),
        std::net::IpAddr::V6(_) => None,
    };
    let renderers = crate::discovery::run_discovery(&state.config, &state.client, local_ip, &state.bus).await;
    Json(renderers.len()).into_response()
}

/// Request body for `POST /blast/auto`.
#[derive(Debug, Deserialize)]
pub struct AutoBlastRequest {
    /// Current evaluation context to match rules against.
    pub context: EvaluationContextDto,
}

/// Wire-friendly mirror of [`EvaluationContext`] (kept separate so the core
/// type doesn't need `Deserialize` derived solely for this endpoint).
#[derive(Debug, Deserialize)]
pub struct EvaluationContextDto {
    /// Network state, matching [`crate::model::NetworkState`]'s JSON shape.
    pub network: crate::model::NetworkState,
    /// Minutes since midnight.
    pub time_of_day_minutes: u16,
    /// ISO weekday, 1 = Monday .. 7 = Sunday.
    pub day_of_week: u8,
}

impl From<EvaluationContextDto> for EvaluationContext {
    fn from(dto: EvaluationContextDto) -> Self {
        EvaluationContext {
            network: dto.network,
            time_of_day_minutes: dto.time_of_day_minutes,
            day_of_week: dto.day_of_week,
        }
    }
}

/// `POST /blast/auto` — loads rules from the rule store, evaluates them
/// against the supplied context, and blasts the first match, if any.
/// Persists the post-evaluation rule state (trigger timestamps and
/// edge-detection state) back to the store regardless of whether a rule
/// fired, so the next call can tell a continuing match from a fresh one.
async fn auto_blast(State(state): State<Arc<ApiState>>, Json(req): Json<AutoBlastRequest>) -> Response {
    let ctx: EvaluationContext = req.context.into();
    let now = now_millis();
    let mut rules = state.rule_store.load();

    let fired = evaluate(&mut rules, &ctx, now);
    let rule_name = fired.map(|i| rules[i].name.clone());

    if let Err(e) = state.rule_store.save(&rules) {
        return e.into_response();
    }

    match rule_name {
        Some(name) => {
            log::info!("rule {name:?} matched, starting blast");
            start_blast(State(state)).await
        }
        None => PipelineError::InvalidConfig("no rule matched the supplied context".into()).into_response(),
    }
}

/// Builds the trigger API router.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/blast/start", post(start_blast))
        .route("/blast/run-clip", post(run_clip))
        .route("/blast/discover-only", post(discover_only))
        .route("/blast/auto", post(auto_blast))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_counts_only_playing_as_succeeded() {
        use crate::model::{Renderer, RendererSource};
        use crate::orchestrator::{FailureKind, RendererState};
        use std::net::{IpAddr, Ipv4Addr};

        let renderer = Renderer {
            ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            port: 1400,
            device_type: None,
            friendly_name: None,
            manufacturer: None,
            model: None,
            control_urls: Default::default(),
            icon_url: None,
            uuid: None,
            source: RendererSource::Ssdp,
        };
        let outcomes = vec![
            RendererOutcome {
                renderer: renderer.clone(),
                state: RendererState::Playing,
                latency_ms: 120,
            },
            RendererOutcome {
                renderer,
                state: RendererState::Failed(FailureKind::PerDeviceTimeout, "timeout".into()),
                latency_ms: 4000,
            },
        ];
        let summary = summarize(&outcomes);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
    }
}
