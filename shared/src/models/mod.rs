//! Domain models for the seed warehouse inventory

mod empenho;
mod history;
mod occupancy;
mod settings;
mod stock;
mod taxonomy;
mod warehouse;

pub use empenho::*;
pub use history::*;
pub use occupancy::*;
pub use settings::*;
pub use stock::*;
pub use taxonomy::*;
pub use warehouse::*;
