use hauler_core::error::AppError;
use hauler_core::models::Document;
use hauler_core::util::resolve_link;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Compile a CSS selector, reporting bad ones as configuration errors.
pub fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::ConfigError(format!("Invalid selector {css:?}: {e}")))
}

/// A fetched document parsed into a DOM tree for selector queries.
///
/// The tree is not `Send`; parse, query, and drop it between awaits.
pub struct HtmlPage {
    url: Url,
    html: Html,
}

impl HtmlPage {
    pub fn parse(document: &Document) -> Self {
        Self {
            url: document.url.clone(),
            html: Html::parse_document(&document.body),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Absolute http(s) targets of every element matching `css` that has
    /// an `href`, in document order.
    pub fn links(&self, css: &str) -> Result<Vec<Url>, AppError> {
        let sel = selector(css)?;
        Ok(self
            .html
            .select(&sel)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| resolve_link(&self.url, href))
            .collect())
    }

    /// Whitespace-normalised text of every match.
    pub fn texts(&self, css: &str) -> Result<Vec<String>, AppError> {
        let sel = selector(css)?;
        Ok(self.html.select(&sel).map(element_text).collect())
    }

    /// Text of the first match.
    pub fn text(&self, css: &str) -> Result<Option<String>, AppError> {
        let sel = selector(css)?;
        Ok(self.html.select(&sel).next().map(element_text))
    }

    /// Value of `attr` on every match that carries it.
    pub fn attrs(&self, css: &str, attr: &str) -> Result<Vec<String>, AppError> {
        let sel = selector(css)?;
        Ok(self
            .html
            .select(&sel)
            .filter_map(|el| el.value().attr(attr))
            .map(|v| v.trim().to_string())
            .collect())
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
