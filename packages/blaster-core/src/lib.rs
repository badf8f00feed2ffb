//! Core library for the LAN media-blaster pipeline.
//!
//! A blast run discovers UPnP/DLNA media renderers on the local network via
//! SSDP, mDNS, and a TCP port-scan fallback, merges them through a
//! deduplicating Discovery Bus, then drives each one through
//! `SetAVTransportURI` + `Play` against a clip served by the in-process
//! Media Origin. A Rule Evaluator can trigger blasts automatically from
//! observed network/time conditions.
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod didl;
pub mod discovery;
pub mod error;
pub mod events;
pub mod model;
pub mod orchestrator;
pub mod origin;
pub mod pipeline;
pub mod rules;
pub mod soap;
pub mod utils;

pub use api::ApiState;
pub use bootstrap::{bootstrap_services, bootstrap_services_with_network, BootstrappedServices};
pub use config::BlastConfig;
pub use context::NetworkContext;
pub use error::{ErrorCode, PipelineError, PipelineResult};
pub use events::{EventBus, PipelineEvent};
pub use model::{ClipSource, EvaluationContext, NetworkState, Renderer, RendererSource};
pub use origin::MediaOrigin;
pub use pipeline::run_blast;
pub use rules::{evaluate as evaluate_rules, Condition, Rule, RuleStore};
