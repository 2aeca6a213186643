use std::collections::HashMap;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a route's `host_pattern` is compared against the request's `Host`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostMatchType {
    /// Equal after lowercasing and stripping any port.
    Exact,
    /// `host == pattern` or `host` ends with `"." + pattern`.
    Suffix,
    /// Pattern `*.example.com` matches any single label in the leftmost position.
    Wildcard,
    /// Unconditional match.
    Any,
}

/// How a route's `path_pattern` is compared against the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMatchType {
    Exact,
    /// Path-segment-aligned prefix: equal, or the next character is `/`.
    Prefix,
    /// Full-match against a pre-compiled anchored regular expression.
    Regex,
}

/// Which part of a request/response pipeline an event's cost is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeteringMode {
    /// `metering_expr` is ignored; the plan's base cost multiplier is used.
    Fixed,
    /// `metering_expr` is evaluated over `{respBody, status, method, path}`.
    Expression,
}

/// A single header-matching predicate attached to a [`Route`].
///
/// A `required = true` rule must match for the route to be selected. A
/// `required = false` rule only constrains the match if the header is
/// present on the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderMatch {
    pub name: String,
    pub value: String,
    pub is_regex: bool,
    pub required: bool,
}

/// Declarative request/response mutation attached to a [`Route`].
///
/// Expressions are evaluated by `apigate-expr` over
/// `{req, resp?, body, headers, user, key}` (see `apigate-expr::Context`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transform {
    /// Header name -> expression source producing the header's string value.
    #[serde(default)]
    pub set_headers: HashMap<String, String>,
    #[serde(default)]
    pub delete_headers: Vec<String>,
    /// Query parameter name -> expression source.
    #[serde(default)]
    pub set_query: HashMap<String, String>,
    /// Expression source whose serialized result replaces the body.
    #[serde(default)]
    pub body_expr: Option<String>,
}

/// A matching rule that selects one upstream and describes how to transform
/// and meter traffic sent to it.
///
/// Invariant: at most one route is selected per request; selection is
/// deterministic given the configured set (see `apigate-gateway::router`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub name: String,
    pub host_pattern: String,
    pub host_match_type: HostMatchType,
    pub path_pattern: String,
    pub match_type: PathMatchType,
    /// Empty means any method.
    pub methods: HashSet<String>,
    pub headers: Vec<HeaderMatch>,
    pub upstream_id: Uuid,
    /// May reference captured suffix/regex groups via `$1..$n`.
    pub path_rewrite: Option<String>,
    pub method_override: Option<String>,
    pub request_transform: Option<Transform>,
    pub response_transform: Option<Transform>,
    pub metering_expr: String,
    pub metering_mode: MeteringMode,
    pub priority: i32,
    pub auth_required: bool,
    pub enabled: bool,
}
