//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod http;
pub mod object_store;
pub mod telemetry;
pub mod upstream;
