//! Command implementations.

pub mod completions;
pub mod mapping;
pub mod runs;
pub mod sync;
pub mod version;
