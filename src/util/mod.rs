//! Shared types used throughout the crate.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`Resolution`] - validated per-pixel buffer dimensions

mod error;
mod resolution;

pub use error::*;
pub use resolution::*;
