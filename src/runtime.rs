//! Runtime glue: configuration, fatal error capture, progress snapshots,
//! persistence sinks, telemetry, and runner orchestration.

pub mod config;
pub mod fatal;
pub mod progress;
pub mod runner;
pub mod sink;
pub mod telemetry;
