//! Resolvers
//!
//! Pure functions of (request, class snapshot, platform config). They never
//! block and never touch shared state.

pub mod compute;
pub mod volume;

pub use compute::*;
pub use volume::*;
