//! Error type for catalog scraping and downloads.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Failed to create HTTP client: {source}")]
    Client { source: reqwest::Error },

    // HTTP and network
    #[error("Network error: could not reach {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead { url: String, source: reqwest::Error },

    #[error("Rate limited by the catalog at {url}; the response was not saved.")]
    Throttled { url: String },

    // Filesystem
    #[error("Cannot create data directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Parsing
    #[error("Could not parse page {url}: {message}")]
    ParsePage { url: String, message: String },
}
