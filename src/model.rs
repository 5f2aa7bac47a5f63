//! Shared data model: catalog listings, EPUB manifest items, and conversion reports.
//!
//! Reports serialize to the JSON written by `--report`. Keys are snake_case throughout.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Format requested from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    Txt,
    Epub,
}

impl DownloadFormat {
    pub fn extension(self) -> &'static str {
        match self {
            DownloadFormat::Txt => "txt",
            DownloadFormat::Epub => "epub",
        }
    }
}

/// One book found on a catalog list page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookListing {
    pub title: String,
    /// Absolute URL of the book page.
    pub page_url: String,
    /// Download links (site-relative or absolute) for the requested format.
    pub download_links: Vec<String>,
}

/// One manifest entry of an EPUB package. `href` is relative to the package document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
}

/// Document-wide mapping from resource ids to locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub items: Vec<ManifestItem>,
}

impl Manifest {
    pub fn by_id(&self, id: &str) -> Option<&ManifestItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn by_href(&self, href: &str) -> Option<&ManifestItem> {
        self.items.iter().find(|item| item.href == href)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Outcome of converting one EPUB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BookReport {
    pub source: PathBuf,
    pub output: Option<PathBuf>,
    pub title: Option<String>,
    /// First `dc:creator` of the package.
    #[serde(default)]
    pub author: Option<String>,
    /// Sections written in full.
    pub sections: usize,
    /// Sections cut short by unbalanced or malformed markup; their partial text was written.
    pub truncated_sections: usize,
    /// Sections that could not be read and were left out.
    pub skipped_sections: usize,
    pub characters: usize,
    /// Output already existed; nothing was converted.
    #[serde(default)]
    pub skipped_existing: bool,
    pub source_removed: bool,
    /// Set when the book could not be converted at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Totals for one conversion pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConversionReport {
    pub books: Vec<BookReport>,
    pub characters: usize,
    pub elapsed_secs: f64,
    pub chars_per_sec: u64,
}

impl ConversionReport {
    pub fn failed(&self) -> usize {
        self.books.iter().filter(|b| b.error.is_some()).count()
    }

    pub fn converted(&self) -> usize {
        self.books
            .iter()
            .filter(|b| b.error.is_none() && !b.skipped_existing)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn sample_manifest() -> Manifest {
        Manifest {
            items: vec![
                ManifestItem {
                    id: "ch1".to_string(),
                    href: "Text/chapter1.xhtml".to_string(),
                    media_type: "application/xhtml+xml".to_string(),
                },
                ManifestItem {
                    id: "cover".to_string(),
                    href: "Images/cover.jpg".to_string(),
                    media_type: "image/jpeg".to_string(),
                },
            ],
        }
    }

    #[test]
    fn manifest_lookup_by_id_and_href() {
        let manifest = sample_manifest();
        assert_eq!(
            manifest.by_id("ch1").map(|i| i.href.as_str()),
            Some("Text/chapter1.xhtml")
        );
        assert_eq!(
            manifest.by_href("Images/cover.jpg").map(|i| i.id.as_str()),
            Some("cover")
        );
        assert!(manifest.by_id("missing").is_none());
        assert_eq!(manifest.len(), 2);
        assert!(Manifest::default().is_empty());
    }

    #[test]
    fn download_format_extension_and_serde() -> Result<(), Box<dyn Error>> {
        assert_eq!(DownloadFormat::Txt.extension(), "txt");
        assert_eq!(DownloadFormat::Epub.extension(), "epub");
        assert_eq!(serde_json::to_string(&DownloadFormat::Epub)?, "\"epub\"");
        Ok(())
    }

    #[test]
    fn conversion_report_json_shape() -> Result<(), Box<dyn Error>> {
        let report = ConversionReport {
            books: vec![
                BookReport {
                    source: PathBuf::from("data/a.epub"),
                    output: Some(PathBuf::from("data/a.txt")),
                    title: Some("A".to_string()),
                    author: Some("Anon".to_string()),
                    sections: 3,
                    truncated_sections: 1,
                    characters: 120,
                    ..Default::default()
                },
                BookReport {
                    source: PathBuf::from("data/b.epub"),
                    error: Some("not a zip".to_string()),
                    ..Default::default()
                },
            ],
            characters: 120,
            elapsed_secs: 0.5,
            chars_per_sec: 240,
        };
        let value: serde_json::Value = serde_json::to_value(&report)?;
        assert_eq!(value["chars_per_sec"].as_u64(), Some(240));
        assert_eq!(value["elapsed_secs"].as_f64(), Some(0.5));
        assert_eq!(value["books"][0]["sections"].as_u64(), Some(3));
        assert_eq!(value["books"][0]["truncated_sections"].as_u64(), Some(1));
        assert_eq!(value["books"][0]["skipped_existing"].as_bool(), Some(false));
        assert_eq!(value["books"][0]["author"].as_str(), Some("Anon"));
        assert!(value.get("charsPerSec").is_none());
        assert!(value["books"][0].get("error").is_none());
        assert_eq!(value["books"][1]["error"].as_str(), Some("not a zip"));
        assert_eq!(report.failed(), 1);
        assert_eq!(report.converted(), 1);
        Ok(())
    }

    #[test]
    fn manifest_item_uses_snake_case_keys() -> Result<(), Box<dyn Error>> {
        let value = serde_json::to_value(&sample_manifest())?;
        assert_eq!(
            value["items"][0]["media_type"].as_str(),
            Some("application/xhtml+xml")
        );
        assert!(value["items"][0].get("mediaType").is_none());
        Ok(())
    }
}
