//! Declarative request/response transformation.
//!
//! Each expression is evaluated by `apigate-expr`'s sandboxed evaluator over
//! `{req, resp?, body, headers, user, key, now}`. A failing expression leaves
//! its target field unchanged and is logged — it never fails the request.

use std::collections::HashMap;

use apigate_core::{Key, Route, Transform, User};
use apigate_expr::{Context, Value};
use tracing::warn;

use crate::http::{ProxyRequest, ProxyResponse};

/// Apply `route.request_transform` (if any) to `req` in place, per
/// ordering: delete_headers, then set_headers, then
/// set_query, then body_expr.
pub fn apply_request(route: &Route, req: &mut ProxyRequest, user: &User, key: &Key) {
    let Some(transform) = &route.request_transform else { return };
    let ctx = build_context(req, None, user, key);
    apply(transform, &ctx, TransformTarget::Request(req));
}

/// Apply `route.response_transform` (if any) to `resp` in place.
pub fn apply_response(route: &Route, req: &ProxyRequest, resp: &mut ProxyResponse, user: &User, key: &Key) {
    let Some(transform) = &route.response_transform else { return };
    let ctx = build_context(req, Some(resp), user, key);
    apply(transform, &ctx, TransformTarget::Response(resp));
}

enum TransformTarget<'a> {
    Request(&'a mut ProxyRequest),
    Response(&'a mut ProxyResponse),
}

fn apply(transform: &Transform, ctx: &Context, target: TransformTarget<'_>) {
    match target {
        TransformTarget::Request(req) => {
            for name in &transform.delete_headers {
                req.remove_header(name);
            }
            for (name, expr) in &transform.set_headers {
                match apigate_expr::evaluate_to_string(expr, ctx) {
                    Ok(value) => req.set_header(name, value),
                    Err(e) => warn!(header = %name, error = %e, "request header transform failed; left unchanged"),
                }
            }
            if !transform.set_query.is_empty() {
                for (name, expr) in &transform.set_query {
                    match apigate_expr::evaluate_to_string(expr, ctx) {
                        Ok(value) => {
                            req.query.insert(name.clone(), value);
                        }
                        Err(e) => warn!(param = %name, error = %e, "request query transform failed; left unchanged"),
                    }
                }
            }
            if let Some(body_expr) = &transform.body_expr {
                match apigate_expr::evaluate(body_expr, ctx) {
                    Ok(value) => {
                        req.body = serde_json::to_vec(&value.to_json()).unwrap_or_default();
                        req.set_header("Content-Length", req.body.len().to_string());
                    }
                    Err(e) => warn!(error = %e, "request body transform failed; body left unchanged"),
                }
            }
        }
        TransformTarget::Response(resp) => {
            for name in &transform.delete_headers {
                resp.remove_header(name);
            }
            for (name, expr) in &transform.set_headers {
                match apigate_expr::evaluate_to_string(expr, ctx) {
                    Ok(value) => resp.set_header(name, value),
                    Err(e) => warn!(header = %name, error = %e, "response header transform failed; left unchanged"),
                }
            }
            if let Some(body_expr) = &transform.body_expr {
                match apigate_expr::evaluate(body_expr, ctx) {
                    Ok(value) => {
                        resp.body = serde_json::to_vec(&value.to_json()).unwrap_or_default();
                        resp.set_header("Content-Length", resp.body.len().to_string());
                    }
                    Err(e) => warn!(error = %e, "response body transform failed; body left unchanged"),
                }
            }
        }
    }
}

fn build_context(req: &ProxyRequest, resp: Option<&ProxyResponse>, user: &User, key: &Key) -> Context {
    let headers_map: HashMap<String, Value> = req
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let req_map = Value::Map(HashMap::from([
        ("method".to_owned(), Value::String(req.method.clone())),
        ("path".to_owned(), Value::String(req.path.clone())),
    ]));

    let body_str = String::from_utf8_lossy(&req.body).into_owned();

    let user_map = Value::Map(HashMap::from([
        ("id".to_owned(), Value::String(user.id.to_string())),
        ("email".to_owned(), Value::String(user.email.clone())),
    ]));
    let key_map = Value::Map(HashMap::from([
        ("id".to_owned(), Value::String(key.id.to_string())),
        ("name".to_owned(), Value::String(key.name.clone())),
    ]));

    let mut ctx = Context::new()
        .with("req", req_map)
        .with("headers", Value::Map(headers_map))
        .with("body", Value::String(body_str))
        .with("user", user_map)
        .with("key", key_map)
        .with("now", Value::Int(chrono::Utc::now().timestamp()));

    if let Some(resp) = resp {
        let resp_map = Value::Map(HashMap::from([
            ("status".to_owned(), Value::Int(i64::from(resp.status))),
        ]));
        ctx = ctx.with("resp", resp_map);
    }

    ctx
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use apigate_core::{HostMatchType, MeteringMode, PathMatchType, UserStatus};
    use uuid::Uuid;

    use super::*;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "u@example.com".into(),
            plan_id: Uuid::new_v4(),
            status: UserStatus::Active,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn key() -> Key {
        Key {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            hash: secrecy::SecretString::from("h".to_owned()),
            prefix: "ak_".into(),
            name: "primary".into(),
            scopes: vec![],
            expires_at: None,
            revoked_at: None,
            last_used: None,
            created_at: chrono::Utc::now(),
        }
    }

    fn route_with_transform(transform: Transform) -> Route {
        Route {
            id: Uuid::new_v4(),
            name: "r".into(),
            host_pattern: String::new(),
            host_match_type: HostMatchType::Any,
            path_pattern: "/".into(),
            match_type: PathMatchType::Prefix,
            methods: HashSet::new(),
            headers: vec![],
            upstream_id: Uuid::new_v4(),
            path_rewrite: None,
            method_override: None,
            request_transform: Some(transform),
            response_transform: None,
            metering_expr: String::new(),
            metering_mode: MeteringMode::Fixed,
            priority: 0,
            auth_required: true,
            enabled: true,
        }
    }

    fn req() -> ProxyRequest {
        ProxyRequest {
            method: "GET".into(),
            path: "/v1/items".into(),
            query: HashMap::new(),
            headers: vec![("X-Old".into(), "stale".into())],
            body: vec![],
        }
    }

    #[test]
    fn delete_then_set_headers_in_order() {
        let transform = Transform {
            delete_headers: vec!["X-Old".into()],
            set_headers: HashMap::from([("X-User".into(), "user.email".to_owned())]),
            ..Default::default()
        };
        let route = route_with_transform(transform);
        let mut r = req();
        apply_request(&route, &mut r, &user(), &key());

        assert!(r.header("X-Old").is_none());
        assert_eq!(r.header("X-User"), Some("u@example.com"));
    }

    #[test]
    fn set_query_merges_into_request() {
        let transform = Transform {
            set_query: HashMap::from([("trace".into(), "\"abc\"".to_owned())]),
            ..Default::default()
        };
        let route = route_with_transform(transform);
        let mut r = req();
        apply_request(&route, &mut r, &user(), &key());
        assert_eq!(r.query.get("trace"), Some(&"abc".to_owned()));
    }

    #[test]
    fn failing_expression_leaves_header_unchanged() {
        let transform = Transform {
            set_headers: HashMap::from([("X-Bad".into(), "((".to_owned())]),
            ..Default::default()
        };
        let route = route_with_transform(transform);
        let mut r = req();
        apply_request(&route, &mut r, &user(), &key());
        assert!(r.header("X-Bad").is_none());
    }

    #[test]
    fn body_expr_recomputes_content_length() {
        let transform = Transform {
            body_expr: Some("\"hello\"".to_owned()),
            ..Default::default()
        };
        let route = route_with_transform(transform);
        let mut r = req();
        apply_request(&route, &mut r, &user(), &key());
        assert_eq!(r.body, b"\"hello\"");
        assert_eq!(r.header("Content-Length"), Some(r.body.len().to_string()).as_deref());
    }

    #[test]
    fn no_transform_is_noop() {
        let route = Route { request_transform: None, ..route_with_transform(Transform::default()) };
        let mut r = req();
        let before = r.clone();
        apply_request(&route, &mut r, &user(), &key());
        assert_eq!(r.headers, before.headers);
    }
}
