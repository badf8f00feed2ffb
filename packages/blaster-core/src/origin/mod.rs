//! Media Origin: the HTTP server renderers pull the clip from. Serves the
//! configured clip at a stable path, proxying remote clips and serving
//! local files with `Range` support, and hot-swaps the active clip without
//! renderers ever observing a partial/missing response.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::RwLock;
use reqwest::Client;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::context::NetworkContext;
use crate::error::{PipelineError, PipelineResult};
use crate::model::ClipSource;

const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const UPSTREAM_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// A clip ready to be served: its source plus the file extension the
/// `/media/current.<ext>` path should advertise.
#[derive(Clone)]
struct ActiveClip {
    source: ClipSource,
}

/// Shared state behind the Media Origin's axum router.
#[derive(Clone)]
struct OriginState {
    clip: Arc<RwLock<Option<ActiveClip>>>,
    http_client: Client,
}

/// Handle to a running Media Origin: lets callers swap the active clip and
/// read back the URL renderers should use, without needing to restart the
/// HTTP listener.
#[derive(Clone)]
pub struct MediaOrigin {
    state: OriginState,
    network: NetworkContext,
}

impl MediaOrigin {
    /// Builds a Media Origin bound to `network`'s advertise identity. Call
    /// [`Self::start`] to actually bind and serve.
    pub fn new(network: NetworkContext, http_client: Client) -> Self {
        Self {
            state: OriginState {
                clip: Arc::new(RwLock::new(None)),
                http_client,
            },
            network,
        }
    }

    /// Sets the clip to be served, replacing whatever was active. This is a
    /// single atomic pointer swap: in-flight requests against the old clip
    /// continue serving the old source; new requests see the new one.
    pub fn set_clip(&self, source: ClipSource) -> PipelineResult<()> {
        source.validate()?;
        *self.state.clip.write() = Some(ActiveClip { source });
        Ok(())
    }

    /// Clears the active clip; subsequent requests return 503.
    pub fn clear_clip(&self) {
        *self.state.clip.write() = None;
    }

    /// The full URL renderers should be given for `SetAVTransportURI`,
    /// or an error if no clip has been set.
    pub fn get_media_url(&self) -> PipelineResult<String> {
        let guard = self.state.clip.read();
        let clip = guard.as_ref().ok_or(PipelineError::NoClipConfigured)?;
        let builder = self.network.url_builder();
        Ok(match &clip.source {
            ClipSource::Local { .. } => builder.media_url(&clip.source.extension()),
            ClipSource::Remote { .. } => builder.stream_url(),
        })
    }

    /// Binds a listener — preferring `preferred_port`, falling back to an
    /// OS-assigned ephemeral port if that one is taken — and starts serving
    /// in the background. Returns once the listener is bound; the serve
    /// loop runs for the lifetime of the returned `tokio::task::JoinHandle`.
    pub async fn start(&self, preferred_port: u16) -> PipelineResult<tokio::task::JoinHandle<()>> {
        let listener = bind_preferred_or_any(preferred_port).await?;
        let bound_port = listener
            .local_addr()
            .map_err(|e| PipelineError::OriginBindFailed(e.to_string()))?
            .port();
        self.network.set_port(bound_port);

        let app = build_router(self.state.clone());
        let handle = tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });
        Ok(handle)
    }
}

async fn bind_preferred_or_any(preferred_port: u16) -> PipelineResult<TcpListener> {
    let preferred_addr: SocketAddr = ([0, 0, 0, 0], preferred_port).into();
    if let Ok(listener) = TcpListener::bind(preferred_addr).await {
        return Ok(listener);
    }
    let any_addr: SocketAddr = ([0, 0, 0, 0], 0).into();
    TcpListener::bind(any_addr)
        .await
        .map_err(|e| PipelineError::OriginBindFailed(e.to_string()))
}

fn build_router(state: OriginState) -> Router {
    Router::new()
        .route("/media/current.{ext}", get(serve_local))
        .route("/media/stream", get(serve_stream))
        .route("/health", get(health_check))
        .route("/debug", get(debug_state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /health` — 200 once a clip is configured and the origin can serve
/// it, 503 otherwise (nothing for the Orchestrator to point renderers at).
async fn health_check(State(state): State<OriginState>) -> impl IntoResponse {
    if state.clip.read().is_some() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "no clip configured")
    }
}

async fn debug_state(State(state): State<OriginState>) -> impl IntoResponse {
    let guard = state.clip.read();
    let description = match guard.as_ref() {
        Some(clip) => format!("{:?}", clip.source),
        None => "no clip set".to_string(),
    };
    (StatusCode::OK, description)
}

async fn serve_local(State(state): State<OriginState>, headers: HeaderMap) -> Response {
    let path = {
        let guard = state.clip.read();
        let Some(clip) = guard.as_ref() else {
            return PipelineError::NoClipConfigured.into_response();
        };
        let ClipSource::Local { path } = &clip.source else {
            return PipelineError::InvalidClipSource("current clip is remote, use /media/stream".into()).into_response();
        };
        path.clone()
    };

    serve_local_file(&path, headers.get(header::RANGE)).await
}

async fn serve_local_file(path: &str, range: Option<&HeaderValue>) -> Response {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    let total_len = metadata.len();

    let (start, end, status) = match range.and_then(|v| v.to_str().ok()).and_then(parse_range_header) {
        Some((start, end)) => (start, end.min(total_len.saturating_sub(1)), StatusCode::PARTIAL_CONTENT),
        None => (0, total_len.saturating_sub(1), StatusCode::OK),
    };

    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    use tokio::io::{AsyncReadExt, AsyncSeekExt};
    if tokio::io::AsyncSeekExt::seek(&mut file, std::io::SeekFrom::Start(start))
        .await
        .is_err()
    {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let to_read = end.saturating_sub(start) + 1;
    let mut buf = vec![0u8; to_read as usize];
    if AsyncReadExt::read_exact(&mut file, &mut buf).await.is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let content_type = guess_content_type(path);
    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, buf.len().to_string());
    if status == StatusCode::PARTIAL_CONTENT {
        response = response.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{total_len}"),
        );
    }
    response.body(Body::from(buf)).unwrap().into_response()
}

fn parse_range_header(value: &str) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = if end.is_empty() { u64::MAX } else { end.parse().ok()? };
    Some((start, end))
}

fn guess_content_type(path: &str) -> &'static str {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("ogg") => "audio/ogg",
        _ => "application/octet-stream",
    }
}

async fn serve_stream(State(state): State<OriginState>) -> Response {
    let url = {
        let guard = state.clip.read();
        let Some(clip) = guard.as_ref() else {
            return PipelineError::NoClipConfigured.into_response();
        };
        let ClipSource::Remote { url } = &clip.source else {
            return PipelineError::InvalidClipSource("current clip is local, use /media/current.<ext>".into()).into_response();
        };
        url.clone()
    };
    let client = state.http_client.clone();

    let upstream = client
        .get(&url)
        .timeout(UPSTREAM_CONNECT_TIMEOUT + UPSTREAM_READ_TIMEOUT)
        .send()
        .await;

    match upstream {
        Ok(resp) if resp.status().is_success() => {
            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("audio/mpeg"));
            let stream = resp.bytes_stream();
            let body = Body::from_stream(stream);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::TRANSFER_ENCODING, "chunked")
                .body(body)
                .unwrap()
        }
        Ok(resp) => {
            PipelineError::UpstreamProxyFailed(format!("upstream status {}", resp.status())).into_response()
        }
        Err(e) => PipelineError::UpstreamProxyFailed(e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_range_header() {
        assert_eq!(parse_range_header("bytes=0-99"), Some((0, 99)));
    }

    #[test]
    fn parses_open_ended_range_header() {
        assert_eq!(parse_range_header("bytes=500-"), Some((500, u64::MAX)));
    }

    #[test]
    fn rejects_malformed_range_header() {
        assert_eq!(parse_range_header("not-a-range"), None);
    }

    #[test]
    fn content_type_guessed_from_extension() {
        assert_eq!(guess_content_type("clip.mp3"), "audio/mpeg");
        assert_eq!(guess_content_type("clip.wav"), "audio/wav");
        assert_eq!(guess_content_type("clip.unknown"), "application/octet-stream");
    }

    #[tokio::test]
    async fn health_check_reports_503_until_a_clip_is_set() {
        let state = OriginState {
            clip: Arc::new(RwLock::new(None)),
            http_client: Client::new(),
        };
        let response = health_check(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        *state.clip.write() = Some(ActiveClip {
            source: ClipSource::Remote {
                url: "https://example.com/clip.mp3".into(),
            },
        });
        let response = health_check(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_media_url_errors_without_clip() {
        let network = NetworkContext::for_test();
        let origin = MediaOrigin::new(network, Client::new());
        assert!(origin.get_media_url().is_err());
    }

    #[tokio::test]
    async fn set_clip_then_get_media_url_round_trips_for_remote() {
        let network = NetworkContext::explicit(8080, std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
        let origin = MediaOrigin::new(network, Client::new());
        origin
            .set_clip(ClipSource::Remote {
                url: "https://example.com/clip.mp3".into(),
            })
            .unwrap();
        let url = origin.get_media_url().unwrap();
        assert_eq!(url, "http://127.0.0.1:8080/media/stream");
    }
}
