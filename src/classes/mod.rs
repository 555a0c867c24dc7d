//! Resource Classes
//!
//! Quantity parsing, class policies, the validated class model and the
//! registry that serves versioned class snapshots to the resolvers.

pub mod events;
pub mod model;
pub mod policy;
pub mod quantity;
pub mod registry;

pub use events::*;
pub use model::*;
pub use policy::*;
pub use quantity::{format_list, Quantity, GIB};
pub use registry::*;
