pub mod api;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod server;

pub use catalog::{CatalogError, VersionCatalog};
pub use server::VersionServer;
