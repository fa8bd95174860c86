//! Source drivers shipped with Hauler.

pub mod catalog;
pub mod paged;

pub use catalog::{CatalogConfig, CatalogDriver, CatalogRecord, FieldRule};
pub use paged::{ApiItem, PagedApiDriver};
