//! The request-time gateway pipeline: routing (C1), authentication (C2),
//! rate limiting (C3), quota enforcement (C4), declarative transforms (C5),
//! usage metering (C6), and the in-process event bus that drives the
//! router's cache and feeds `apigate-webhook` (C7, wired by `apigate-server`).
//!
//! `apigate-server` is the only caller of this crate's public API: it
//! builds one [`pipeline::Gateway`] at startup from a chosen `PrincipalStore`/
//! `RoutingStore`/`MeteringStore` backend, spawns the background tasks each
//! module exposes (`RateLimiter::run_cleanup_loop`, `UsageBatcher::run`,
//! periodic `UsageRollup`), and calls [`pipeline::Gateway::handle`] once per
//! inbound HTTP request.

pub mod authenticator;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod forward;
pub mod http;
pub mod pipeline;
pub mod quota;
pub mod ratelimit;
pub mod router;
pub mod transform;
pub mod usage;

pub use authenticator::{Authenticator, Principal};
pub use config::GatewayConfig;
pub use error::{AuthRejectReason, GatewayError};
pub use event_bus::InProcessEventBus;
pub use http::{ProxyRequest, ProxyResponse};
pub use pipeline::{Gateway, RequestContext};
pub use quota::{ConsumeOutcome, QuotaGuard};
pub use ratelimit::{RateLimitDecision, RateLimiter};
pub use router::{Router, RouteMatch};
pub use usage::{UsageBatcher, UsageRecorder, UsageRecorderConfig, UsageRollup};
