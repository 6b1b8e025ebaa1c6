//! HTTP handlers

pub mod catalog;
pub mod empenho;
pub mod health;
pub mod history;
pub mod reporting;
pub mod settings;
pub mod stock;
pub mod warehouse;

pub use catalog::*;
pub use empenho::*;
pub use health::*;
pub use history::*;
pub use reporting::*;
pub use settings::*;
pub use stock::*;
pub use warehouse::*;
