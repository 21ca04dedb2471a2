//! Leaf types shared by the isubench engine: run configuration, the
//! score/fail aggregator and the URL cache store.
mod cache;
mod config;
mod constants;
pub mod metrics;
mod score;

pub use cache::*;
pub use config::*;
pub use constants::*;
pub use score::*;
