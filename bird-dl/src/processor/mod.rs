//! Data preprocessing building blocks.

pub mod augmentation;
pub mod geometric;
pub mod image_store;
pub mod label_mixing;
pub mod photometric;

pub use augmentation::*;
pub use geometric::*;
pub use image_store::*;
pub use label_mixing::*;
pub use photometric::*;
