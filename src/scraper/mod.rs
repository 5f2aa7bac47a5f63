//! Catalog scraping. Shared polite client, list and book page parsing, and downloads.

mod catalog;
mod client;
mod error;

pub use catalog::{
    book_file_name, category_page_url, download_book, is_throttled, link_title, page_offsets,
    parse_book_links, parse_book_page, scrape_catalog, CatalogOptions, DownloadOutcome,
    DownloadSummary, DEFAULT_BASE_URL, DEFAULT_CATEGORY_ID, DEFAULT_PAGES, DEFAULT_PAGE_ITEMS,
    DEFAULT_THROTTLE_MARKER,
};
pub use client::{PoliteClient, PoliteClientBuilder};
pub use error::ScraperError;

use reqwest::Url;

/// Parse a catalog base URL. Messages name the offending input.
pub fn parse_base_url(input: &str) -> Result<Url, ScraperError> {
    let url = Url::parse(input).map_err(|e| ScraperError::InvalidUrl {
        input: input.to_string(),
        reason: e.to_string(),
    })?;
    if url.host_str().is_none() {
        return Err(ScraperError::InvalidUrl {
            input: input.to_string(),
            reason: "URL has no host".to_string(),
        });
    }
    Ok(url)
}

/// Resolve a site-relative or absolute link against the catalog base.
pub fn resolve_link(base: &Url, link: &str) -> Result<String, ScraperError> {
    base.join(link.trim())
        .map(String::from)
        .map_err(|e| ScraperError::InvalidUrl {
            input: link.to_string(),
            reason: e.to_string(),
        })
}
