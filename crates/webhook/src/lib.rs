//! HMAC-signed webhook dispatch, outcome handling, and retry scheduling.
//!
//! Dispatch uses a `reqwest::Client` with a configured per-delivery timeout
//! and `hmac`+`sha2`+`hex` request signing. The retry scheduler and backoff
//! table are implemented fresh against this port.

mod dispatcher;
mod engine;
mod error;

pub use dispatcher::dispatch;
pub use engine::WebhookEngine;
pub use error::WebhookError;
