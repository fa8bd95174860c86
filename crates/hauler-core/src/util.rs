use std::path::Path;

use url::Url;

/// Derive a collection name from a file path.
///
/// Extracts the file stem (name without extension).
/// Example: `"sources/pharmacy.json"` → `"pharmacy"`
pub fn derive_collection_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("default")
        .to_string()
}

/// Resolve a link found on `base` to an absolute http(s) URL.
///
/// Fragments are stripped. Returns `None` for unparsable links and for
/// non-web schemes such as `mailto:` or `javascript:`.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let mut url = base.join(href.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Run-scoped identity of a page: path plus query, host dropped.
pub fn path_key(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}
