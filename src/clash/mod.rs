pub mod client;
mod endpoints;
pub mod keys;
pub mod metrics;
pub mod tag;
pub mod types;

pub use client::{ClashClient, Fetched};
pub use metrics::RequestMetrics;
