//! Standalone HTTP server binding for the APIGate gateway pipeline:
//! config loading, backend construction, background task wiring, and the
//! `axum` router that exposes `apigate_gateway::Gateway::handle` over HTTP.

pub mod api;
pub mod background;
pub mod config;
pub mod error;
pub mod metrics;
pub mod state_factory;
