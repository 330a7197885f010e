//! Dataset discovery and partitioning.

mod partition;
mod utils;

pub use partition::*;
pub use utils::*;
