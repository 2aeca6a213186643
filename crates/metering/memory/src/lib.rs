//! In-memory `MeteringStore` backend. Suitable for tests and single-replica
//! deployments; see `apigate-metering-postgres` for the durable,
//! multi-replica binding.

mod store;

pub use store::MemoryMeteringStore;
