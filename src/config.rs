//! Optional config file loading. Search order: ./ebook-corpus.toml, then
//! $XDG_CONFIG_HOME/ebook-corpus/config.toml (or ~/.config/ebook-corpus/config.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Directory books are downloaded into and converted in. Relative to CWD.
    pub data_dir: Option<PathBuf>,
    /// Catalog category id.
    pub category_id: Option<u32>,
    /// Number of list pages to scrape.
    pub pages: Option<u32>,
    /// Books per list page.
    pub page_items: Option<u32>,
    /// Download format: txt or epub.
    pub format: Option<String>,
    /// Keep the downloaded .epub after converting it.
    pub keep_source: Option<bool>,
    /// Section converter: stream, grid, or markdown.
    pub converter: Option<String>,
    /// Layout width in columns.
    pub line_width: Option<usize>,
    /// Worker threads for downloads and conversion.
    pub jobs: Option<usize>,
    pub user_agent: Option<String>,
    pub request_delay_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts for transient failures.
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2, 4]).
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Text that marks a rate-limited download. Empty string disables the check.
    pub throttle_marker: Option<String>,
}

/// Search order: (1) ./ebook-corpus.toml, (2) $XDG_CONFIG_HOME/ebook-corpus/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("ebook-corpus.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("ebook-corpus").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            return load_config_file(path).map(Some);
        }
    }
    Ok(None)
}

/// Read and parse one config file.
pub fn load_config_file(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}
