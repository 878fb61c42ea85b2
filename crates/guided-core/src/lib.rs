//! Shared types for the guided-filter compute pipeline.
//!
//! Home of the error taxonomy, the host-staging policy, and the small
//! geometry helpers every stage uses when validating its launch setup.

mod error;
mod staging;

pub mod geometry;

pub use error::{FilterError, FilterResult};
pub use staging::Staging;
