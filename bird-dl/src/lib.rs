//! The data pipeline of the bird spectrogram classifier.
//!
//! It partitions a class-per-directory image dataset, loads and augments
//! spectrogram images, assembles mixed-label training batches and prepares
//! them in a background context while the model consumes the previous one.

mod common;
pub mod dataset;
pub mod processor;
pub mod stream;
pub mod utils;
