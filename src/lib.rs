pub mod api;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod prompt;
pub mod storage;

#[cfg(test)]
mod tests;

pub use error::{RagError, Result};
