use thiserror::Error;

/// Errors a `PrincipalStore`/`RoutingStore`/`MeteringStore` implementation
/// may return. Deliberately coarse-grained: callers (the gateway pipeline)
/// react to `NotFound` vs. everything else, and most callers only log
/// `Backend`/`Conflict` and carry on rather than fail the request.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    /// A write that required an absent precondition (e.g. compare-and-swap,
    /// at-most-one-default-plan) lost a race.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The underlying backend (Postgres, the in-memory map) failed. The
    /// message is for logs only — never surfaced to an HTTP caller verbatim
    /// (no SQL text or stack traces).
    #[error("store backend error: {0}")]
    Backend(String),
}
