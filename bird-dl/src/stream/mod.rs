//! Batch assembly and background batch preparation.

mod batch_assembler;
mod overlapped;

pub use batch_assembler::*;
pub use overlapped::*;
