//! The end-to-end request pipeline (control flow, C1-C7):
//! `Match -> Authenticate -> Allow(rate) -> Check/Consume(quota) ->
//! ApplyRequest(transform) -> forward -> ApplyResponse(transform) ->
//! Record(usage)`, publishing `usage.threshold`/`usage.limit` events as the
//! quota guard crosses them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use apigate_core::{Event, EventBus, EventType, MeteringMode, MeteringStore, PrincipalStore, RoutingStore};

use crate::authenticator::{extract_credential, Authenticator, Principal};
use crate::config::GatewayConfig;
use crate::error::{AuthRejectReason, GatewayError};
use crate::forward::{self, inject_upstream_auth};
use crate::http::{ProxyRequest, ProxyResponse};
use crate::quota::{self, QuotaGuard};
use crate::ratelimit::RateLimiter;
use crate::router::Router;
use crate::transform;
use crate::usage::UsageRecorder;

/// Everything one inbound request carries beyond its `ProxyRequest` body:
/// the `Host` header used for route matching, and metadata for the usage
/// log that isn't part of the proxied request itself.
pub struct RequestContext {
    pub host: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Owns every C1-C7 component and drives one request through all of them.
/// Cheap to clone (every field is an `Arc`); `apigate-server` holds one
/// instance per process and clones it per connection/task as needed.
pub struct Gateway {
    router: Arc<Router>,
    routing_store: Arc<dyn RoutingStore>,
    authenticator: Arc<Authenticator>,
    principal_store: Arc<dyn PrincipalStore>,
    rate_limiter: Arc<RateLimiter>,
    quota_guard: Arc<QuotaGuard>,
    usage_recorder: Arc<UsageRecorder>,
    event_bus: Arc<dyn EventBus>,
    http_client: reqwest::Client,
    config: GatewayConfig,
}

impl Gateway {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Arc<Router>,
        routing_store: Arc<dyn RoutingStore>,
        principal_store: Arc<dyn PrincipalStore>,
        metering_store: Arc<dyn MeteringStore>,
        usage_recorder: Arc<UsageRecorder>,
        event_bus: Arc<dyn EventBus>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            router,
            routing_store,
            authenticator: Arc::new(Authenticator::new(Arc::clone(&principal_store))),
            principal_store,
            rate_limiter: Arc::new(RateLimiter::new(Arc::clone(&metering_store))),
            quota_guard: Arc::new(QuotaGuard::new(metering_store)),
            usage_recorder,
            event_bus,
            http_client: reqwest::Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn quota_guard(&self) -> Arc<QuotaGuard> {
        Arc::clone(&self.quota_guard)
    }

    #[must_use]
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.rate_limiter)
    }

    #[must_use]
    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.router)
    }

    /// Drive `req` through the full C1-C7 pipeline, returning the response
    /// to send back to the caller, or the [`GatewayError`] whose
    /// [`GatewayError::status_code`] the caller (`apigate-server`) should
    /// surface instead.
    ///
    /// # Errors
    /// See [`GatewayError`]'s variants, each mapping to one HTTP status code.
    pub async fn handle(&self, ctx: &RequestContext, mut req: ProxyRequest) -> Result<ProxyResponse, GatewayError> {
        let started = Instant::now();

        let route_match = self.router.match_request(&ctx.host, &req.path, &req.method, &req.headers)?;
        let route = route_match.route;
        req.path = route_match.rewritten_path;
        req.method = route_match.method;

        let upstream = self.routing_store.get_upstream(route.upstream_id).await?;
        if !upstream.enabled {
            return Err(GatewayError::UpstreamUnavailable);
        }

        let principal = self.resolve_principal(route.auth_required, &req).await?;

        let rate_decision = if let Some(principal) = &principal {
            Some(self.enforce_rate_limit(principal).await?)
        } else {
            None
        };

        let period_start = quota::current_period_start(Utc::now());
        if let Some(principal) = &principal {
            let caps = quota::caps_for_plan(&principal.plan);
            if !self.quota_guard.check(principal.user.id, period_start, caps).await? {
                return Err(GatewayError::QuotaExceeded);
            }
        }

        if let Some(principal) = &principal {
            transform::apply_request(&route, &mut req, &principal.user, &principal.key);
        }

        inject_upstream_auth(&upstream, &mut req);

        let request_bytes = req.body.len() as u64;
        let forwarded = forward::forward(&self.http_client, &upstream, &req, self.config.default_request_deadline).await;

        // A deadline-exceeded forward still records a usage event against
        // the synthetic 504, even though the caller ultimately sees the
        // error, not a response body.
        let mut response = match forwarded {
            Ok(response) => response,
            Err(GatewayError::UpstreamTimeout) => {
                if let Some(principal) = &principal {
                    let synthetic = ProxyResponse { status: 504, headers: Vec::new(), body: Vec::new() };
                    self.record_usage(ctx, &req, &synthetic, principal, &route, period_start, request_bytes, 0, started.elapsed())
                        .await?;
                }
                return Err(GatewayError::UpstreamTimeout);
            }
            Err(e) => return Err(e),
        };
        let response_bytes = response.body.len() as u64;

        if let Some(principal) = &principal {
            transform::apply_response(&route, &req, &mut response, &principal.user, &principal.key);
        }

        if let Some(decision) = &rate_decision {
            response.set_header("X-RateLimit-Limit", decision.limit.to_string());
            response.set_header("X-RateLimit-Remaining", decision.remaining.to_string());
            response.set_header("X-RateLimit-Reset", decision.reset_at.timestamp().to_string());
        }

        if let Some(principal) = &principal {
            self.record_usage(
                ctx,
                &req,
                &response,
                principal,
                &route,
                period_start,
                request_bytes,
                response_bytes,
                started.elapsed(),
            )
            .await?;
        }

        Ok(response)
    }

    /// A route requiring auth must resolve a `Principal` or
    /// the request is rejected outright. A route that doesn't require auth
    /// attempts authentication opportunistically, so a valid credential
    /// still enables rate-limit/quota/usage tracking, but never rejects the
    /// request on a missing or invalid one.
    async fn resolve_principal(&self, auth_required: bool, req: &ProxyRequest) -> Result<Option<Principal>, GatewayError> {
        let credential = extract_credential(&req.headers, &self.config.api_key_header);

        if auth_required {
            let credential = credential.ok_or(GatewayError::AuthRejected(AuthRejectReason::Missing))?;
            Ok(Some(self.authenticator.authenticate(&credential).await?))
        } else {
            match credential {
                Some(credential) => Ok(self.authenticator.authenticate(&credential).await.ok()),
                None => Ok(None),
            }
        }
    }

    async fn enforce_rate_limit(&self, principal: &Principal) -> Result<crate::ratelimit::RateLimitDecision, GatewayError> {
        let decision = self
            .rate_limiter
            .allow(principal.key.id, principal.plan.rate_limit_per_minute, self.config.default_burst)
            .await?;
        if !decision.allowed {
            let retry_after = RateLimiter::retry_after_secs(&decision, Utc::now());
            return Err(GatewayError::RateLimited { retry_after });
        }
        Ok(decision)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_usage(
        &self,
        ctx: &RequestContext,
        req: &ProxyRequest,
        resp: &ProxyResponse,
        principal: &Principal,
        route: &apigate_core::Route,
        period_start: chrono::DateTime<Utc>,
        request_bytes: u64,
        response_bytes: u64,
        latency: Duration,
    ) -> Result<(), GatewayError> {
        let cost_multiplier = cost_multiplier_for(route, req, resp, principal);

        let event = apigate_core::UsageEvent {
            id: Uuid::now_v7(),
            key_id: principal.key.id,
            user_id: principal.user.id,
            method: req.method.clone(),
            path: req.path.clone(),
            status_code: resp.status,
            latency_ms: latency.as_millis().min(u128::from(u64::MAX)) as u64,
            request_bytes,
            response_bytes,
            cost_multiplier,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            timestamp: Utc::now(),
        };
        self.usage_recorder.record(event);

        let caps = quota::caps_for_plan(&principal.plan);
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let delta_compute = cost_multiplier.max(0.0) as u64;
        let outcome = self
            .quota_guard
            .consume(principal.user.id, period_start, 1, delta_compute, request_bytes + response_bytes, caps)
            .await?;

        if outcome.crossed_limit {
            self.publish_usage_event(EventType::UsageLimit, principal.user.id, &outcome.state).await;
        } else if outcome.crossed_threshold {
            self.publish_usage_event(EventType::UsageThreshold, principal.user.id, &outcome.state).await;
        }

        Ok(())
    }

    async fn publish_usage_event(&self, event_type: EventType, user_id: Uuid, state: &apigate_core::QuotaState) {
        let data = serde_json::json!({
            "request_count": state.request_count,
            "compute_units": state.compute_units,
            "bytes_used": state.bytes_used,
            "period_start": state.period_start,
        });
        self.event_bus.publish(Event::new(event_type, Some(user_id), data)).await;
    }
}

/// `fixed` mode always uses the plan's base cost; `expression` mode
/// evaluates `route.metering_expr` over the completed request/response and
/// clamps to the plan's base cost on parse or evaluation failure, or a
/// negative/non-finite result.
fn cost_multiplier_for(route: &apigate_core::Route, req: &ProxyRequest, resp: &ProxyResponse, principal: &Principal) -> f64 {
    if route.metering_mode == MeteringMode::Fixed {
        return principal.plan.estimated_cost_per_req;
    }

    let ctx = apigate_expr::Context::new()
        .with("method", apigate_expr::Value::String(req.method.clone()))
        .with("path", apigate_expr::Value::String(req.path.clone()))
        .with("status", apigate_expr::Value::Int(i64::from(resp.status)))
        .with("respBody", apigate_expr::Value::String(String::from_utf8_lossy(&resp.body).into_owned()));

    apigate_expr::evaluate_cost_multiplier(&route.metering_expr, &ctx).unwrap_or(principal.plan.estimated_cost_per_req)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::collections::HashSet;

    use apigate_core::{HostMatchType, PathMatchType, Plan};

    use super::*;

    fn plan(meter: apigate_core::MeterType, cost: f64) -> Plan {
        Plan {
            id: Uuid::new_v4(),
            name: "p".into(),
            rate_limit_per_minute: 60,
            requests_per_month: 1000,
            price_monthly: 0.0,
            overage_price: 0.0,
            meter_type: meter,
            estimated_cost_per_req: cost,
            is_default: true,
            enabled: true,
        }
    }

    fn route(mode: MeteringMode, expr: &str) -> apigate_core::Route {
        apigate_core::Route {
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
            request_transform: None,
            response_transform: None,
            metering_expr: expr.to_owned(),
            metering_mode: mode,
            priority: 0,
            auth_required: true,
            enabled: true,
        }
    }

    fn principal_with(plan: Plan) -> Principal {
        Principal {
            user: apigate_core::User {
                id: Uuid::new_v4(),
                email: "u@example.com".into(),
                plan_id: plan.id,
                status: apigate_core::UserStatus::Active,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            key: apigate_core::Key {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                hash: secrecy::SecretString::from("h".to_owned()),
                prefix: "ak_".into(),
                name: "primary".into(),
                scopes: vec![],
                expires_at: None,
                revoked_at: None,
                last_used: None,
                created_at: Utc::now(),
            },
            plan,
        }
    }

    fn req() -> ProxyRequest {
        ProxyRequest { method: "GET".into(), path: "/v1/items".into(), query: HashMap::new(), headers: vec![], body: vec![] }
    }

    fn resp() -> ProxyResponse {
        ProxyResponse { status: 200, headers: vec![], body: b"{}".to_vec() }
    }

    #[test]
    fn fixed_mode_uses_plan_base_cost() {
        let principal = principal_with(plan(apigate_core::MeterType::Requests, 2.5));
        let route = route(MeteringMode::Fixed, "1 + 1");
        assert_eq!(cost_multiplier_for(&route, &req(), &resp(), &principal), 2.5);
    }

    #[test]
    fn expression_mode_evaluates_and_falls_back_on_error() {
        let principal = principal_with(plan(apigate_core::MeterType::ComputeUnits, 1.0));
        let ok_route = route(MeteringMode::Expression, "status / 100");
        assert_eq!(cost_multiplier_for(&ok_route, &req(), &resp(), &principal), 2.0);

        let bad_route = route(MeteringMode::Expression, "((");
        assert_eq!(cost_multiplier_for(&bad_route, &req(), &resp(), &principal), 1.0);
    }
}
