//! Shared types and domain rules for the seed warehouse inventory
//!
//! This crate contains the models and pure rules used by the backend server
//! and by the canvas/empenho client (via WASM).

pub mod error;
pub mod models;
pub mod simulation;
pub mod types;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::DomainError;
pub use models::*;
pub use simulation::*;
pub use types::*;
pub use validation::*;
