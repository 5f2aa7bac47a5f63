//! ebook-corpus: downloads free e-books from a catalog category and flattens EPUB chapters
//! into plain text.

pub mod cli;
pub mod config;
pub mod convert;
pub mod epub;
pub mod extract;
pub mod model;
pub mod scraper;

// Re-exports for CLI and consumers.
pub use convert::{convert_book, convert_directory, ConvertError, ConvertOptions, Converter};
pub use epub::{EpubArchive, EpubError, EpubPackage, SpineItem};
pub use extract::{
    extract_section_text, extract_section_text_with, layout_section, ExtractError,
    ExtractOptions, LayoutSurface, SectionLayout, Truncation,
};
pub use model::{
    BookListing, BookReport, ConversionReport, DownloadFormat, Manifest, ManifestItem,
};
pub use scraper::{
    scrape_catalog, CatalogOptions, DownloadSummary, PoliteClient, PoliteClientBuilder,
    ScraperError,
};
