pub mod api;
pub mod assessment;
pub mod cli;
pub mod config;
pub mod error;
pub mod telemetry;
