//! Centralized error types for the blast pipeline.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error kinds using `thiserror`
//! - Maps errors to machine-readable codes via [`ErrorCode`]
//! - Implements `IntoResponse` for the variants that can surface from an HTTP handler

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide a stable, machine-readable error code.
///
/// The code is independent of the `Display` message so telemetry/log
/// correlation doesn't break when a message is reworded.
pub trait ErrorCode {
    /// Returns a machine-readable error code for telemetry/API responses.
    fn code(&self) -> &'static str;
}

/// A renderer identity `(ip, port)`, used to tag per-renderer errors.
pub type RendererId = (std::net::IpAddr, u16);

/// Top-level error type for the blast pipeline.
#[derive(Debug, Error, Serialize, Clone)]
#[serde(tag = "type", content = "details")]
pub enum PipelineError {
    /// No routable IPv4 interface could be found; fatal for the pipeline.
    #[error("no routable network interface available")]
    NetworkUnavailable,

    /// The Media Origin HTTP server failed to bind; fatal for the pipeline.
    #[error("media origin failed to bind: {0}")]
    OriginBindFailed(String),

    /// Fetching or parsing a renderer's device description XML failed.
    #[error("description fetch failed for {0:?}: {1}")]
    DescriptionFetchFailed(RendererId, String),

    /// SOAP `SetAVTransportURI` failed; retryable up to `soap_retry_count`.
    #[error("SetAVTransportURI failed for {0:?} (upnp code {1:?})")]
    SoapSetFailed(RendererId, Option<u32>),

    /// SOAP `Play` failed; retryable up to `soap_retry_count`.
    #[error("Play failed for {0:?} (upnp code {1:?})")]
    SoapPlayFailed(RendererId, Option<u32>),

    /// A per-renderer task exceeded `per_device_timeout_ms`; terminal for that renderer.
    #[error("per-device timeout for {0:?}")]
    PerDeviceTimeout(RendererId),

    /// The global `total_budget_ms` elapsed; terminal for the pipeline.
    #[error("global budget expired")]
    GlobalBudgetExpired,

    /// The `/media/stream` upstream fetch failed; surfaced as HTTP 502.
    #[error("upstream proxy failed: {0}")]
    UpstreamProxyFailed(String),

    /// A supplied `ClipSource` failed validation (missing file, bad URL, ...).
    #[error("invalid clip source: {0}")]
    InvalidClipSource(String),

    /// No clip has been set on the Media Origin yet.
    #[error("no clip configured")]
    NoClipConfigured,

    /// Malformed or out-of-range configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Rule store persistence failure (I/O or serialization).
    #[error("rule store error: {0}")]
    RuleStore(String),
}

impl ErrorCode for PipelineError {
    fn code(&self) -> &'static str {
        match self {
            Self::NetworkUnavailable => "network_unavailable",
            Self::OriginBindFailed(_) => "origin_bind_failed",
            Self::DescriptionFetchFailed(_, _) => "description_fetch_failed",
            Self::SoapSetFailed(_, _) => "soap_set_failed",
            Self::SoapPlayFailed(_, _) => "soap_play_failed",
            Self::PerDeviceTimeout(_) => "per_device_timeout",
            Self::GlobalBudgetExpired => "global_budget_expired",
            Self::UpstreamProxyFailed(_) => "upstream_proxy_failed",
            Self::InvalidClipSource(_) => "invalid_clip_source",
            Self::NoClipConfigured => "no_clip_configured",
            Self::InvalidConfig(_) => "invalid_config",
            Self::RuleStore(_) => "rule_store_error",
        }
    }
}

impl PipelineError {
    /// Maps the error to an appropriate HTTP status code, for the subset of
    /// variants that can originate from an HTTP handler.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UpstreamProxyFailed(_) => StatusCode::BAD_GATEWAY,
            Self::NoClipConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidClipSource(_) | Self::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn id() -> RendererId {
        (IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)), 1400)
    }

    #[test]
    fn upstream_proxy_failed_maps_to_502() {
        let err = PipelineError::UpstreamProxyFailed("connect refused".into());
        assert_eq!(err.code(), "upstream_proxy_failed");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn no_clip_configured_maps_to_503() {
        let err = PipelineError::NoClipConfigured;
        assert_eq!(err.code(), "no_clip_configured");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn soap_set_failed_carries_renderer_id() {
        let err = PipelineError::SoapSetFailed(id(), Some(718));
        assert_eq!(err.code(), "soap_set_failed");
        assert!(err.to_string().contains("718"));
    }
}
