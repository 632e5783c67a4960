//! Infrastructure adapters and runtime bootstrap.

pub mod bootstrap;
pub mod client;
pub mod error;
pub mod http;
pub mod telemetry;
