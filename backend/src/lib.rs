pub mod aggregator;
pub mod api;
pub mod chain;
pub mod config;
pub mod introspection;
pub mod orchestrator;
pub mod providers;
pub mod refresh;
pub mod scoring;
pub mod service;
pub mod store;
pub mod types;

pub use config::BenchmarkConfig;
pub use types::*;
