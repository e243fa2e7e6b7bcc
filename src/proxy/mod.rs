//! Proxy core: aggregation and routing across backends.
//!
//! - `Router`: backend identifier → connection, resolves namespaced names
//! - `Aggregator`: fan-out listings, merge in configuration order, resource
//!   ownership snapshot
//! - `ProxySession`: the operations a frontend adapter calls, plus collective
//!   connect/disconnect and the status query

pub mod aggregator;
pub mod errors;
pub mod router;
pub mod session;

pub use aggregator::Aggregator;
pub use errors::ProxyError;
pub use router::{split_namespaced, Router};
pub use session::{BackendReport, ProxySession};
