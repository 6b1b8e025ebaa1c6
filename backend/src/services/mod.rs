//! Business logic services for the seed warehouse inventory

pub mod audit;
pub mod dashboard;
pub mod empenho;
pub mod history;
pub mod ledger;
pub mod photo;
pub mod product;
pub mod settings;
pub mod taxonomy;
pub mod warehouse;

pub use audit::AuditService;
pub use dashboard::DashboardService;
pub use empenho::EmpenhoService;
pub use history::{HistoryService, HistorySigner};
pub use ledger::LedgerService;
pub use photo::{BlobStore, LocalBlobStore, PhotoService};
pub use product::ProductService;
pub use settings::{ConfigurationService, ProfileService};
pub use taxonomy::TaxonomyService;
pub use warehouse::WarehouseService;
