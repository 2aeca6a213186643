use thiserror::Error;

/// The gateway pipeline's unified error type. Variants map directly onto
/// the HTTP status the server surfaces; `apigate-server` converts each to
/// the response the caller sees without leaking the `source`/`Backend`
/// detail (no SQL text or stack traces reach the client).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No enabled route matched the request (404).
    #[error("no route matched")]
    NoRouteMatched,

    /// The matched route's upstream is disabled (503).
    #[error("upstream unavailable")]
    UpstreamUnavailable,

    /// Authentication rejected the presented credential; the inner reason is for logs only.
    #[error("authentication rejected: {0}")]
    AuthRejected(AuthRejectReason),

    /// The route requires auth and none/invalid credential was presented,
    /// but also covers a suspended user (401/403 per reason).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Rate limiting denied the request; `retry_after` is seconds until the window resets.
    #[error("rate limit exceeded")]
    RateLimited { retry_after: u64 },

    /// Quota enforcement denied the request (over quota for the billing period).
    #[error("quota exceeded")]
    QuotaExceeded,

    /// The upstream round-trip exceeded the request's deadline (504).
    #[error("upstream deadline exceeded")]
    UpstreamTimeout,

    /// The upstream connection failed outright (surfaced as 502).
    #[error("upstream request failed: {0}")]
    UpstreamError(String),

    /// A storage port returned an error. Must never be constructed on the
    /// hot allow/deny path for rate-limit/quota decisions that can fail
    /// open; it exists for the genuinely unrecoverable cases (route/auth
    /// lookups with no sane fail-open behavior).
    #[error("storage error")]
    Store(#[from] apigate_core::StoreError),
}

/// Why C2 rejected a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejectReason {
    Missing,
    Unknown,
    Revoked,
    Expired,
    Suspended,
    Deleted,
    NoPlan,
}

impl std::fmt::Display for AuthRejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Missing => "missing credential",
            Self::Unknown => "unknown key",
            Self::Revoked => "revoked key",
            Self::Expired => "expired key",
            Self::Suspended => "user suspended",
            Self::Deleted => "user deleted",
            Self::NoPlan => "no resolvable plan",
        };
        f.write_str(s)
    }
}

impl GatewayError {
    /// The HTTP status `apigate-server` should surface for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoRouteMatched => 404,
            Self::UpstreamUnavailable => 503,
            Self::AuthRejected(reason) => match reason {
                AuthRejectReason::Suspended | AuthRejectReason::Deleted => 403,
                _ => 401,
            },
            Self::Forbidden(_) => 403,
            Self::RateLimited { .. } | Self::QuotaExceeded => 429,
            Self::UpstreamTimeout => 504,
            Self::UpstreamError(_) => 502,
            Self::Store(_) => 500,
        }
    }
}
