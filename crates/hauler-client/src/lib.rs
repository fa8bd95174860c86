pub mod html;
pub mod jq;
pub mod sources;
pub mod transport;

pub use html::HtmlPage;
pub use jq::JqTransform;
pub use sources::{CatalogConfig, CatalogDriver, PagedApiDriver};
pub use transport::{EgressProxy, ReqwestTransport};
