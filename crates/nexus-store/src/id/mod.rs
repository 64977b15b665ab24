//! Id allocation
//!
//! Every store file has an [`IdGenerator`] backed by a companion `.id` file.
//! Generators are obtained through an [`IdGeneratorFactory`] so callers can
//! substitute their own allocation policy.

mod factory;
mod generator;

pub use factory::{DefaultIdGeneratorFactory, IdGeneratorFactory};
pub use generator::{ID_HEADER_SIZE, IdGenerator};
