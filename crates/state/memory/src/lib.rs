//! In-memory `PrincipalStore`/`RoutingStore` backend. Suitable for tests and
//! single-replica deployments; see `apigate-state-postgres` for the durable,
//! multi-replica binding.

mod principal;
mod routing;

pub use principal::MemoryPrincipalStore;
pub use routing::MemoryRoutingStore;
