//! Application services: board administration, content builders and the
//! regeneration pipeline.

pub mod boards;
pub mod builder;
pub mod error;
pub mod notifier;
pub mod rebuild;
pub mod repos;
pub mod settings;
