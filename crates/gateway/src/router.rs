//! Route matching and selection.
//!
//! Routes are held in a `parking_lot::RwLock`-guarded `Arc<[CompiledRoute]>`
//! snapshot, rebuilt whenever the caller observes a `route.*`/`upstream.*`
//! `EventBus` message — a copy-on-write config cache so request-path
//! readers never block on a writer. Both the path regex and any regex
//! header rules are compiled once at reload, never per-request.

use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tracing::warn;

use apigate_core::{HeaderMatch, HostMatchType, PathMatchType, Route, RoutingStore};

use crate::error::GatewayError;

/// A `Route` plus its pre-compiled regexes: the path regex (if
/// `match_type = Regex`) and one entry per `route.headers` rule with
/// `is_regex = true`, in the same order, so the request path never calls
/// `Regex::new`.
struct CompiledRoute {
    route: Route,
    path_regex: Option<Regex>,
    header_regexes: Vec<Option<Regex>>,
}

/// The outcome of a successful [`Router::match_request`] call.
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub rewritten_path: String,
    pub method: String,
}

/// Copy-on-write snapshot of the enabled route set, sorted by
/// `(priority DESC, name ASC)` for deterministic selection.
pub struct Router {
    snapshot: RwLock<Arc<Vec<CompiledRoute>>>,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Reload the route set from `store`. Called at startup and whenever an
    /// `EventBus` message with [`apigate_core::EventType::invalidates_route_cache`]
    /// arrives. A route whose `path_pattern` fails to compile as a regex is
    /// dropped from the set with a warning, not fatal to the reload.
    ///
    /// # Errors
    /// Returns [`GatewayError::Store`] if the `RoutingStore` read fails.
    pub async fn reload(&self, store: &dyn RoutingStore) -> Result<(), GatewayError> {
        let mut routes = store.list_enabled_routes().await?;
        routes.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));

        let compiled = routes
            .into_iter()
            .filter_map(|route| {
                let path_regex = if route.match_type == PathMatchType::Regex {
                    match Regex::new(&anchor(&route.path_pattern)) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            warn!(route = %route.name, error = %e, "route path regex failed to compile; route disabled");
                            return None;
                        }
                    }
                } else {
                    None
                };

                let mut header_regexes = Vec::with_capacity(route.headers.len());
                for rule in &route.headers {
                    if !rule.is_regex {
                        header_regexes.push(None);
                        continue;
                    }
                    match Regex::new(&anchor(&rule.value)) {
                        Ok(re) => header_regexes.push(Some(re)),
                        Err(e) => {
                            warn!(route = %route.name, header = %rule.name, error = %e, "route header regex failed to compile; route disabled");
                            return None;
                        }
                    }
                }

                Some(CompiledRoute { route, path_regex, header_regexes })
            })
            .collect();

        *self.snapshot.write() = Arc::new(compiled);
        Ok(())
    }

    /// Match an incoming request against the current snapshot, returning the
    /// first route (in priority order) whose predicates all accept.
    ///
    /// # Errors
    /// Returns [`GatewayError::NoRouteMatched`] if no enabled route matches.
    pub fn match_request(
        &self,
        host: &str,
        path: &str,
        method: &str,
        headers: &[(String, String)],
    ) -> Result<RouteMatch, GatewayError> {
        let snapshot = self.snapshot.read().clone();

        for compiled in snapshot.iter() {
            let route = &compiled.route;
            if !host_matches(route.host_match_type, &route.host_pattern, host) {
                continue;
            }
            let Some(capture) = path_match(compiled, path) else {
                continue;
            };
            if !method_matches(&route.methods, method) {
                continue;
            }
            if !headers_match(&route.headers, &compiled.header_regexes, headers) {
                continue;
            }

            let rewritten_path = rewrite_path(route.path_rewrite.as_deref(), path, &capture);
            let method = route.method_override.clone().unwrap_or_else(|| method.to_owned());

            return Ok(RouteMatch {
                route: Arc::new(route.clone()),
                rewritten_path,
                method,
            });
        }

        Err(GatewayError::NoRouteMatched)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// What a successful path predicate captured, for `$1..$n` substitution in
/// `path_rewrite`.
enum Capture {
    /// `prefix` match: the path's suffix beyond the matched pattern, bound to `$1`.
    Suffix(String),
    /// `regex` match: the pattern's capture groups, bound to `$1..$n`.
    Groups(Vec<String>),
    None,
}

fn path_match(compiled: &CompiledRoute, path: &str) -> Option<Capture> {
    let route = &compiled.route;
    match route.match_type {
        PathMatchType::Exact => (path == route.path_pattern).then_some(Capture::None),
        PathMatchType::Prefix => {
            let pattern = route.path_pattern.as_str();
            if path == pattern {
                Some(Capture::Suffix(String::new()))
            } else if let Some(rest) = path.strip_prefix(pattern) {
                rest.starts_with('/').then(|| Capture::Suffix(rest.to_owned()))
            } else {
                None
            }
        }
        PathMatchType::Regex => {
            let re = compiled.path_regex.as_ref()?;
            let captures = re.captures(path)?;
            let groups = captures
                .iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_owned()).unwrap_or_default())
                .collect();
            Some(Capture::Groups(groups))
        }
    }
}

/// Wrap a user-supplied path pattern in `^...$` so `regex` route matches are
/// always a full match.
fn anchor(pattern: &str) -> String {
    format!("^(?:{pattern})$")
}

fn rewrite_path(path_rewrite: Option<&str>, original: &str, capture: &Capture) -> String {
    let Some(template) = path_rewrite else {
        return original.to_owned();
    };

    match capture {
        Capture::Suffix(suffix) => template.replace("$1", suffix),
        Capture::Groups(groups) => {
            let mut out = template.to_owned();
            for (i, group) in groups.iter().enumerate() {
                out = out.replace(&format!("${}", i + 1), group);
            }
            out
        }
        Capture::None => template.to_owned(),
    }
}

fn host_matches(match_type: HostMatchType, pattern: &str, host: &str) -> bool {
    let host = strip_port(host).to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();

    match match_type {
        HostMatchType::Any => true,
        HostMatchType::Exact => host == pattern,
        HostMatchType::Suffix => host == pattern || host.ends_with(&format!(".{pattern}")),
        HostMatchType::Wildcard => {
            let Some(suffix) = pattern.strip_prefix("*.") else {
                return host == pattern;
            };
            host.strip_suffix(suffix)
                .is_some_and(|prefix| prefix.ends_with('.') && prefix.len() > 1 && !prefix[..prefix.len() - 1].contains('.'))
        }
    }
}

fn strip_port(host: &str) -> &str {
    host.split(':').next().unwrap_or(host)
}

fn method_matches(methods: &std::collections::HashSet<String>, requested: &str) -> bool {
    methods.is_empty() || methods.iter().any(|m| m.eq_ignore_ascii_case(requested))
}

fn headers_match(rules: &[HeaderMatch], regexes: &[Option<Regex>], headers: &[(String, String)]) -> bool {
    rules.iter().zip(regexes).all(|(rule, regex)| {
        let found = headers.iter().find(|(name, _)| name.eq_ignore_ascii_case(&rule.name));
        match found {
            Some((_, value)) => header_rule_matches(rule, regex.as_ref(), value),
            None => !rule.required,
        }
    })
}

fn header_rule_matches(rule: &HeaderMatch, regex: Option<&Regex>, value: &str) -> bool {
    if rule.is_regex {
        regex.is_some_and(|re| re.is_match(value))
    } else {
        rule.value.eq_ignore_ascii_case(value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use apigate_state::fixture_upstream;
    use apigate_state_memory::MemoryRoutingStore;
    use uuid::Uuid;

    use super::*;

    fn route(name: &str, priority: i32, upstream_id: Uuid) -> Route {
        Route {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            host_pattern: String::new(),
            host_match_type: HostMatchType::Any,
            path_pattern: "/v1/".to_owned(),
            match_type: PathMatchType::Prefix,
            methods: HashSet::new(),
            headers: vec![],
            upstream_id,
            path_rewrite: None,
            method_override: None,
            request_transform: None,
            response_transform: None,
            metering_expr: String::new(),
            metering_mode: apigate_core::MeteringMode::Fixed,
            priority,
            auth_required: true,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn higher_priority_wins_ties_break_by_name() {
        let upstream = fixture_upstream();
        let store = MemoryRoutingStore::new();
        store.insert_upstream(upstream.clone());
        store.insert_route(route("b", 50, upstream.id));
        store.insert_route(route("a", 100, upstream.id));

        let router = Router::new();
        router.reload(&store).await.unwrap();

        let matched = router.match_request("any.example.com", "/v1/items", "GET", &[]).unwrap();
        assert_eq!(matched.route.name, "a");
    }

    #[tokio::test]
    async fn deleting_top_route_falls_through_to_next() {
        let upstream = fixture_upstream();
        let store = MemoryRoutingStore::new();
        store.insert_upstream(upstream.clone());
        let top = route("a", 100, upstream.id);
        let top_id = top.id;
        store.insert_route(top);
        store.insert_route(route("b", 50, upstream.id));

        let router = Router::new();
        router.reload(&store).await.unwrap();
        assert_eq!(router.match_request("h", "/v1/x", "GET", &[]).unwrap().route.name, "a");

        store.remove_route(top_id);
        router.reload(&store).await.unwrap();
        assert_eq!(router.match_request("h", "/v1/x", "GET", &[]).unwrap().route.name, "b");
    }

    #[tokio::test]
    async fn no_match_returns_no_route_matched() {
        let router = Router::new();
        let store = MemoryRoutingStore::new();
        router.reload(&store).await.unwrap();
        assert!(matches!(
            router.match_request("h", "/v1/x", "GET", &[]),
            Err(GatewayError::NoRouteMatched)
        ));
    }

    #[test]
    fn host_exact_strips_port() {
        assert!(host_matches(HostMatchType::Exact, "example.com", "example.com:8080"));
        assert!(!host_matches(HostMatchType::Exact, "example.com", "other.com"));
    }

    #[test]
    fn host_suffix_matches_subdomain_or_self() {
        assert!(host_matches(HostMatchType::Suffix, "example.com", "example.com"));
        assert!(host_matches(HostMatchType::Suffix, "example.com", "api.example.com"));
        assert!(!host_matches(HostMatchType::Suffix, "example.com", "notexample.com"));
    }

    #[test]
    fn host_wildcard_matches_single_leftmost_label() {
        assert!(host_matches(HostMatchType::Wildcard, "*.example.com", "api.example.com"));
        assert!(!host_matches(HostMatchType::Wildcard, "*.example.com", "a.b.example.com"));
        assert!(!host_matches(HostMatchType::Wildcard, "*.example.com", "example.com"));
    }

    #[test]
    fn prefix_path_is_segment_aligned() {
        let compiled = CompiledRoute { route: route("r", 0, Uuid::new_v4()), path_regex: None, header_regexes: vec![] };
        assert!(path_match(&compiled, "/v1/").is_some());
        assert!(path_match(&compiled, "/v1/items").is_some());
        assert!(path_match(&compiled, "/v1").is_none());
    }

    #[test]
    fn rewrite_substitutes_prefix_suffix() {
        let rewritten = rewrite_path(Some("/internal$1"), "/v1/items", &Capture::Suffix("/items".into()));
        assert_eq!(rewritten, "/internal/items");
    }

    #[tokio::test]
    async fn header_regex_rule_is_precompiled_and_matches() {
        let upstream = fixture_upstream();
        let store = MemoryRoutingStore::new();
        store.insert_upstream(upstream.clone());
        let mut r = route("a", 100, upstream.id);
        r.headers = vec![HeaderMatch {
            name: "X-Tenant".to_owned(),
            value: "tenant-[0-9]+".to_owned(),
            is_regex: true,
            required: true,
        }];
        store.insert_route(r);

        let router = Router::new();
        router.reload(&store).await.unwrap();

        assert!(router
            .match_request("h", "/v1/items", "GET", &[("X-Tenant".into(), "tenant-42".into())])
            .is_ok());
        assert!(matches!(
            router.match_request("h", "/v1/items", "GET", &[("X-Tenant".into(), "nope".into())]),
            Err(GatewayError::NoRouteMatched)
        ));
    }

    #[tokio::test]
    async fn invalid_header_regex_drops_route_at_reload() {
        let upstream = fixture_upstream();
        let store = MemoryRoutingStore::new();
        store.insert_upstream(upstream.clone());
        let mut r = route("a", 100, upstream.id);
        r.headers = vec![HeaderMatch {
            name: "X-Tenant".to_owned(),
            value: "(".to_owned(),
            is_regex: true,
            required: true,
        }];
        store.insert_route(r);

        let router = Router::new();
        router.reload(&store).await.unwrap();

        assert!(matches!(
            router.match_request("h", "/v1/items", "GET", &[("X-Tenant".into(), "anything".into())]),
            Err(GatewayError::NoRouteMatched)
        ));
    }

    #[test]
    fn rewrite_substitutes_regex_groups() {
        let rewritten = rewrite_path(
            Some("/users/$1/orders/$2"),
            "/v1/u/42/o/7",
            &Capture::Groups(vec!["42".into(), "7".into()]),
        );
        assert_eq!(rewritten, "/users/42/orders/7");
    }
}
