//! Misc utilities.

mod normalize;

pub use normalize::*;
