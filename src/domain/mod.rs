//! Domain layer: forum records and the rules that govern board settings.

pub mod board_settings;
pub mod entities;
pub mod error;
