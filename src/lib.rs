//! Regeneration coordinator and artifact cache for imageboard front ends.
//!
//! The supervisor boots the cache, forks workers and relays their rebuild
//! requests into a per-key coalescing queue; the queue drives the content
//! builders and writes their snapshots to the cache store.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod supervisor;
pub mod util;
pub mod worker;
