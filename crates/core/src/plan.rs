use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The unit a plan's monthly cap and cost model are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeterType {
    Requests,
    ComputeUnits,
    Bytes,
}

/// A subscription tier: rate limit, monthly quota, and pricing bundle.
///
/// Invariant: at most one `Plan` may have `is_default = true` across the
/// whole catalog; [`crate::PrincipalStore`] implementations must clear any
/// existing default before setting a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub rate_limit_per_minute: u32,
    pub requests_per_month: u64,
    pub price_monthly: f64,
    pub overage_price: f64,
    pub meter_type: MeterType,
    pub estimated_cost_per_req: f64,
    pub is_default: bool,
    pub enabled: bool,
}
