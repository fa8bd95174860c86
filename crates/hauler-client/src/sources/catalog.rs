//! Configuration-driven crawler for catalogue-style storefronts.
//!
//! A site is walked in up to four levels:
//!
//! ```text
//! index ──section_selector──▶ section ──catalog_selector──▶ catalog ──product_selectors──▶ product
//!                                                              │
//!                                                              └─pagination_selector─▶ catalog
//! ```
//!
//! Missing selectors collapse levels: without `section_selector` the index is
//! the only section, without `catalog_selector` every section is a catalog.

use std::collections::BTreeMap;
use std::path::Path;

use hauler_core::error::AppError;
use hauler_core::frontier::Frontier;
use hauler_core::models::{CanonicalRecord, Persistable, Request};
use hauler_core::source::{DriverContext, SourceDriver};
use hauler_core::util::path_key;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::html::{HtmlPage, selector};

/// How one product field is extracted.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FieldRule {
    pub selector: String,
    /// Read this attribute instead of the text content.
    #[serde(default)]
    pub attr: Option<String>,
    /// Collect every match into an array instead of taking the first.
    #[serde(default)]
    pub all: bool,
}

/// Source definition, usually loaded from a JSON file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CatalogConfig {
    pub index_path: String,
    #[serde(default)]
    pub section_selector: Option<String>,
    #[serde(default)]
    pub catalog_selector: Option<String>,
    pub product_selectors: Vec<String>,
    #[serde(default)]
    pub pagination_selector: Option<String>,
    #[serde(default)]
    pub product_fields: BTreeMap<String, FieldRule>,
    /// Stop the crawl once this many product records were emitted.
    #[serde(default)]
    pub limit: Option<u64>,
    /// Also emit a `catalog` record per catalog page listing its products.
    #[serde(default)]
    pub emit_catalogs: bool,
}

impl CatalogConfig {
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AppError::ConfigError(format!("Invalid catalog definition: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        if limit.is_some() {
            self.limit = limit;
        }
        self
    }

    /// Reject definitions that could never produce a product.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.product_selectors.is_empty() {
            return Err(AppError::ConfigError(
                "product_selectors must name at least one selector".into(),
            ));
        }
        let optional = [
            &self.section_selector,
            &self.catalog_selector,
            &self.pagination_selector,
        ];
        for css in optional.into_iter().flatten() {
            selector(css)?;
        }
        for css in &self.product_selectors {
            selector(css)?;
        }
        for rule in self.product_fields.values() {
            selector(&rule.selector)?;
        }
        Ok(())
    }
}

/// Raw records produced by [`CatalogDriver`].
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogRecord {
    Catalog {
        path: String,
        /// Product paths listed on the page, in order, without duplicates.
        products: Vec<String>,
    },
    Product {
        path: String,
        fields: Map<String, Value>,
    },
}

impl Persistable for CatalogRecord {
    fn to_persistable(&self) -> Result<CanonicalRecord, AppError> {
        Ok(match self {
            CatalogRecord::Catalog { path, products } => CanonicalRecord::new(
                "catalog",
                serde_json::json!({ "path": path, "products": products }),
            ),
            CatalogRecord::Product { path, fields } => {
                let mut data = fields.clone();
                data.insert("path".into(), Value::String(path.clone()));
                CanonicalRecord::new("product", Value::Object(data))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Index,
    Section,
    Catalog,
    Product,
}

/// What one page contributes: further pages and at most one record.
#[derive(Default)]
struct Expansion {
    next: Vec<(Url, Level)>,
    record: Option<CatalogRecord>,
}

pub struct CatalogDriver {
    name: String,
    base: Url,
    config: CatalogConfig,
}

impl CatalogDriver {
    pub fn new(base: &str, config: CatalogConfig) -> Result<Self, AppError> {
        let base = Url::parse(base)
            .map_err(|e| AppError::ConfigError(format!("Invalid base URL {base}: {e}")))?;
        config.validate()?;
        Ok(Self {
            name: "catalog".into(),
            base,
            config,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn expand(&self, level: Level, page: &HtmlPage) -> Result<Expansion, AppError> {
        let mut out = Expansion::default();
        match level {
            Level::Index => match &self.config.section_selector {
                Some(css) => out.next = self.follow(page, css, Level::Section)?,
                None => return self.expand(Level::Section, page),
            },
            Level::Section => match &self.config.catalog_selector {
                Some(css) => out.next = self.follow(page, css, Level::Catalog)?,
                None => return self.expand(Level::Catalog, page),
            },
            Level::Catalog => {
                let mut products: Vec<String> = Vec::new();
                for css in &self.config.product_selectors {
                    for (url, _) in self.follow(page, css, Level::Product)? {
                        let key = path_key(&url);
                        if !products.contains(&key) {
                            products.push(key);
                            out.next.push((url, Level::Product));
                        }
                    }
                }
                if let Some(css) = &self.config.pagination_selector {
                    out.next.extend(self.follow(page, css, Level::Catalog)?);
                }
                if self.config.emit_catalogs {
                    out.record = Some(CatalogRecord::Catalog {
                        path: path_key(page.url()),
                        products,
                    });
                }
            }
            Level::Product => {
                let mut fields = Map::new();
                for (name, rule) in &self.config.product_fields {
                    fields.insert(name.clone(), extract(page, rule)?);
                }
                out.record = Some(CatalogRecord::Product {
                    path: path_key(page.url()),
                    fields,
                });
            }
        }
        Ok(out)
    }

    /// Same-site links matching `css`, tagged with the level they lead to.
    fn follow(&self, page: &HtmlPage, css: &str, level: Level) -> Result<Vec<(Url, Level)>, AppError> {
        Ok(page
            .links(css)?
            .into_iter()
            .filter(|url| url.host_str() == self.base.host_str())
            .map(|url| (url, level))
            .collect())
    }
}

fn extract(page: &HtmlPage, rule: &FieldRule) -> Result<Value, AppError> {
    let values = match &rule.attr {
        Some(attr) => page.attrs(&rule.selector, attr)?,
        None => page.texts(&rule.selector)?,
    };
    Ok(if rule.all {
        Value::Array(values.into_iter().map(Value::String).collect())
    } else {
        values.into_iter().next().map_or(Value::Null, Value::String)
    })
}

impl SourceDriver for CatalogDriver {
    type Record = CatalogRecord;

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(self, ctx: &mut DriverContext<CatalogRecord>) -> Result<(), AppError> {
        let index = self
            .base
            .join(&self.config.index_path)
            .map_err(|e| AppError::ConfigError(format!("Invalid index path: {e}")))?;

        let mut frontier = Frontier::new();
        frontier.push(path_key(&index), (index, Level::Index));
        let mut products = 0u64;

        while let Some((path, (url, level))) = frontier.pop() {
            if self.config.limit.is_some_and(|limit| products >= limit) {
                tracing::debug!(pending = frontier.pending(), "Product limit reached");
                break;
            }

            let Some(document) = ctx.document(Request::get(url.as_str())?).await? else {
                continue;
            };

            // The parsed tree must not live across an await.
            let expansion = {
                let page = HtmlPage::parse(&document);
                self.expand(level, &page)?
            };

            let queued = frontier.extend(
                expansion
                    .next
                    .into_iter()
                    .map(|(url, level)| (path_key(&url), (url, level))),
            );
            tracing::debug!(%path, ?level, queued, pending = frontier.pending(), "Page expanded");

            if let Some(record) = expansion.record {
                if matches!(record, CatalogRecord::Product { .. }) {
                    products += 1;
                }
                ctx.emit(record).await?;
            }
        }

        tracing::info!(source = %self.name, products, "Catalog crawl finished");
        Ok(())
    }
}
