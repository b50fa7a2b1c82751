//! Graph Store Adapter (component A): a tenant-scoped FalkorDB client
//! wrapping per-organization graph queries behind a bounded write
//! semaphore, with retry/timeout policy shared from `sibyl-common`.

pub mod client;
pub mod errors;
pub mod value;

pub use client::GraphClient;
pub use errors::GraphError;
pub use value::{bind_params, normalize_result, GraphRow};
