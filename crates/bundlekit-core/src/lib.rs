//! bundlekit core
//!
//! Shared collections and logging setup used by the bundle cache crates.

pub mod alloc;
pub mod logging;
