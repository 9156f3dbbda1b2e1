//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod forum;
pub mod spool;
pub mod telemetry;
pub mod templates;
