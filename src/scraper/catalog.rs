//! Free-catalog downloads. Walks the category list pages, opens each book page, and saves
//! the download for the requested format into the data directory.

use super::{parse_base_url, resolve_link, PoliteClient, PoliteClientBuilder, ScraperError};
use crate::model::{BookListing, DownloadFormat};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Url;
use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://www.smashwords.com";
/// Western romance.
pub const DEFAULT_CATEGORY_ID: u32 = 1245;
pub const DEFAULT_PAGES: u32 = 7;
pub const DEFAULT_PAGE_ITEMS: u32 = 20;
pub const DEFAULT_THROTTLE_MARKER: &str = "Too Many Requests";

const TXT_LINK_TITLE: &str = "Plain text; contains no formatting";
const EPUB_LINK_TITLE: &str = "Supported by many apps and devices (e.g., Apple Books, Barnes and Noble Nook, Kobo, Google Play, etc.)";

fn parse_selector(sel: &str) -> Result<Selector, ScraperError> {
    Selector::parse(sel).map_err(|e| ScraperError::ParsePage {
        url: String::new(),
        message: format!("invalid selector {:?}: {}", sel, e),
    })
}

/// Options for one download pass.
#[derive(Debug, Clone)]
pub struct CatalogOptions {
    pub base_url: String,
    pub category_id: u32,
    /// Number of list pages to walk.
    pub pages: u32,
    /// Books per list page; list offsets step by this.
    pub page_items: u32,
    pub format: DownloadFormat,
    pub data_dir: PathBuf,
    /// Body text that marks a rate-limit page. Empty disables the check.
    pub throttle_marker: String,
    /// List pages fetched at once.
    pub jobs: usize,
    /// Resolve downloads without fetching or writing them.
    pub dry_run: bool,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            category_id: DEFAULT_CATEGORY_ID,
            pages: DEFAULT_PAGES,
            page_items: DEFAULT_PAGE_ITEMS,
            format: DownloadFormat::Txt,
            data_dir: PathBuf::from("./data"),
            throttle_marker: DEFAULT_THROTTLE_MARKER.to_string(),
            jobs: DEFAULT_PAGES as usize,
            dry_run: false,
        }
    }
}

/// What happened to one download link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Saved(PathBuf),
    /// Dry run: where the file would have been written.
    Planned(PathBuf),
    /// Title has no word characters left to name a file with.
    Untitled,
}

/// Totals for one download pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub list_pages: usize,
    pub books_found: usize,
    pub saved: Vec<PathBuf>,
    pub planned: Vec<PathBuf>,
    pub untitled: usize,
    pub failures: usize,
}

impl DownloadSummary {
    fn record(&mut self, outcome: DownloadOutcome) {
        match outcome {
            DownloadOutcome::Saved(path) => self.saved.push(path),
            DownloadOutcome::Planned(path) => self.planned.push(path),
            DownloadOutcome::Untitled => self.untitled += 1,
        }
    }

    fn merge(&mut self, other: DownloadSummary) {
        self.list_pages += other.list_pages;
        self.books_found += other.books_found;
        self.saved.extend(other.saved);
        self.planned.extend(other.planned);
        self.untitled += other.untitled;
        self.failures += other.failures;
    }
}

/// `title` attribute of the download anchor for a format.
pub fn link_title(format: DownloadFormat) -> &'static str {
    match format {
        DownloadFormat::Txt => TXT_LINK_TITLE,
        DownloadFormat::Epub => EPUB_LINK_TITLE,
    }
}

/// List offsets: `0, page_items, 2 * page_items, ...` for `pages` pages.
pub fn page_offsets(pages: u32, page_items: u32) -> Vec<u32> {
    (0..pages).map(|i| i.saturating_mul(page_items)).collect()
}

pub fn category_page_url(base: &str, category_id: u32, offset: u32) -> String {
    format!(
        "{}/books/category/{}/downloads/0/free/any/{}",
        base.trim_end_matches('/'),
        category_id,
        offset
    )
}

/// Absolute book page URLs from a category list page, in page order without repeats.
pub fn parse_book_links(html: &str, base: &Url) -> Result<Vec<String>, ScraperError> {
    let doc = Html::parse_document(html);
    let sel = parse_selector("a.library-title[href]")?;
    let mut links: Vec<String> = Vec::new();
    for el in doc.select(&sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        match resolve_link(base, href) {
            Ok(link) if !links.contains(&link) => links.push(link),
            Ok(_) => {}
            Err(e) => debug!(%href, error = %e, "unusable book link"),
        }
    }
    Ok(links)
}

/// Title and download links for `format` from a book page.
pub fn parse_book_page(
    html: &str,
    page_url: &str,
    format: DownloadFormat,
) -> Result<BookListing, ScraperError> {
    let doc = Html::parse_document(html);
    let container_sel = parse_selector("div#pageContentFull")?;
    let title_sel = parse_selector("h1")?;
    let anchor_sel = parse_selector("a[title][href]")?;

    let container = doc
        .select(&container_sel)
        .next()
        .ok_or_else(|| ScraperError::ParsePage {
            url: page_url.to_string(),
            message: "missing book content container".to_string(),
        })?;
    let title = container
        .select(&title_sel)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .unwrap_or_default();
    let wanted = link_title(format);
    let download_links = container
        .select(&anchor_sel)
        .filter(|a| a.value().attr("title") == Some(wanted))
        .filter_map(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
        .collect();

    Ok(BookListing {
        title,
        page_url: page_url.to_string(),
        download_links,
    })
}

/// File name for a downloaded book: the title with every non-word character removed, plus
/// the format extension. `None` when nothing is left.
pub fn book_file_name(title: &str, format: DownloadFormat) -> Option<String> {
    let stem: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if stem.is_empty() {
        None
    } else {
        Some(format!("{}.{}", stem, format.extension()))
    }
}

/// Whether a downloaded body is the catalog's rate-limit page rather than a book.
pub fn is_throttled(body: &[u8], marker: &str) -> bool {
    let marker = marker.as_bytes();
    !marker.is_empty() && body.windows(marker.len()).any(|w| w == marker)
}

fn fetch_html(client: &mut PoliteClient, url: &str) -> Result<String, ScraperError> {
    let response = client
        .get_with_retry(url)
        .map_err(|e| ScraperError::Network {
            url: url.to_string(),
            source: e,
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(ScraperError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    response.text().map_err(|e| ScraperError::BodyRead {
        url: url.to_string(),
        source: e,
    })
}

/// Download one book into `data_dir`. A rate-limit response is refused and nothing is written.
pub fn download_book(
    client: &mut PoliteClient,
    title: &str,
    url: &str,
    data_dir: &Path,
    format: DownloadFormat,
    throttle_marker: &str,
) -> Result<DownloadOutcome, ScraperError> {
    let Some(file_name) = book_file_name(title, format) else {
        info!(%title, "skipping book: title has no word characters");
        return Ok(DownloadOutcome::Untitled);
    };
    let path = data_dir.join(file_name);

    std::fs::create_dir_all(data_dir).map_err(|e| ScraperError::CreateDir {
        path: data_dir.to_path_buf(),
        source: e,
    })?;

    let response = client
        .get_with_retry(url)
        .map_err(|e| ScraperError::Network {
            url: url.to_string(),
            source: e,
        })?;
    let status = response.status();
    if status.as_u16() == 429 {
        return Err(ScraperError::Throttled {
            url: url.to_string(),
        });
    }
    if !status.is_success() {
        return Err(ScraperError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    let body = response.bytes().map_err(|e| ScraperError::BodyRead {
        url: url.to_string(),
        source: e,
    })?;
    if is_throttled(&body, throttle_marker) {
        return Err(ScraperError::Throttled {
            url: url.to_string(),
        });
    }
    std::fs::write(&path, &body).map_err(|e| ScraperError::WriteFile {
        path: path.clone(),
        source: e,
    })?;
    info!(%title, path = %path.display(), bytes = body.len(), "downloaded");
    Ok(DownloadOutcome::Saved(path))
}

/// One list page: its books, then each book's downloads. Failures are logged and counted.
fn scrape_list_page(
    client: &mut PoliteClient,
    base: &Url,
    options: &CatalogOptions,
    offset: u32,
) -> DownloadSummary {
    let mut summary = DownloadSummary::default();
    let list_url = category_page_url(&options.base_url, options.category_id, offset);
    info!(url = %list_url, "getting book links");
    let links = match fetch_html(client, &list_url).and_then(|html| parse_book_links(&html, base))
    {
        Ok(links) => links,
        Err(e) => {
            warn!(url = %list_url, error = %e, "list page failed");
            summary.failures += 1;
            return summary;
        }
    };
    summary.list_pages = 1;
    summary.books_found = links.len();

    for page_url in links {
        let listing = match fetch_html(client, &page_url)
            .and_then(|html| parse_book_page(&html, &page_url, options.format))
        {
            Ok(listing) => listing,
            Err(e) => {
                warn!(url = %page_url, error = %e, "book page failed");
                summary.failures += 1;
                continue;
            }
        };
        if listing.download_links.is_empty() {
            debug!(url = %page_url, format = options.format.extension(), "no download for format");
        }
        for link in &listing.download_links {
            let outcome = resolve_link(base, link).and_then(|url| {
                if options.dry_run {
                    Ok(match book_file_name(&listing.title, options.format) {
                        Some(name) => {
                            let path = options.data_dir.join(name);
                            info!(title = %listing.title, %url, path = %path.display(), "would download");
                            DownloadOutcome::Planned(path)
                        }
                        None => DownloadOutcome::Untitled,
                    })
                } else {
                    download_book(
                        client,
                        &listing.title,
                        &url,
                        &options.data_dir,
                        options.format,
                        &options.throttle_marker,
                    )
                }
            });
            match outcome {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    warn!(title = %listing.title, error = %e, "download failed");
                    summary.failures += 1;
                }
            }
        }
    }
    summary
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .progress_chars("█▉▊▋▌▍▎▏ ");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar.set_message("Scraping list pages");
    bar
}

/// Walk the catalog. List pages run on up to `jobs` threads, each with its own client.
pub fn scrape_catalog(
    options: &CatalogOptions,
    client: &PoliteClientBuilder,
    show_progress: bool,
) -> Result<DownloadSummary, ScraperError> {
    let base = parse_base_url(&options.base_url)?;
    let offsets = page_offsets(options.pages, options.page_items);
    info!(
        pages = options.pages,
        page_items = options.page_items,
        total = offsets.len() * options.page_items as usize,
        category = options.category_id,
        format = options.format.extension(),
        data_dir = %options.data_dir.display(),
        "scraping catalog"
    );
    let jobs = options.jobs.clamp(1, offsets.len().max(1));
    let bar = progress_bar(offsets.len(), show_progress);
    let next = AtomicUsize::new(0);

    let results: Vec<Result<DownloadSummary, ScraperError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..jobs)
            .map(|_| {
                scope.spawn(|| -> Result<DownloadSummary, ScraperError> {
                    let mut http = client
                        .clone()
                        .build()
                        .map_err(|e| ScraperError::Client { source: e })?;
                    let mut summary = DownloadSummary::default();
                    while let Some(offset) = offsets.get(next.fetch_add(1, Ordering::Relaxed)) {
                        summary.merge(scrape_list_page(&mut http, &base, options, *offset));
                        bar.inc(1);
                    }
                    Ok(summary)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
            })
            .collect()
    });
    bar.finish_and_clear();

    let mut total = DownloadSummary::default();
    for result in results {
        total.merge(result?);
    }
    info!(
        list_pages = total.list_pages,
        books = total.books_found,
        saved = total.saved.len(),
        planned = total.planned.len(),
        untitled = total.untitled,
        failures = total.failures,
        "download pass finished"
    );
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_PAGE: &str = r#"<!DOCTYPE html><html><body>
<div class="library-book">
  <a class="library-title" href="/books/view/101">First Book</a>
  <a class="library-title" href="https://www.smashwords.com/books/view/202">Second Book</a>
  <a class="library-title" href="/books/view/101">First Book (again)</a>
  <a class="library-author" href="/profile/view/someone">Someone</a>
  <a class="library-title">No link</a>
</div>
</body></html>"#;

    fn book_page() -> String {
        format!(
            r#"<!DOCTYPE html><html><body>
<h1>Site header</h1>
<div id="pageContentFull">
  <h1> Lonesome Trail: A Western! </h1>
  <a title="{epub}" href="/books/download/101/8/latest/0/0/lonesome-trail.epub">EPUB</a>
  <a title="{txt}" href="/books/download/101/2/latest/0/0/lonesome-trail.txt">Plain text</a>
  <a title="Read online" href="/books/read/101">Online</a>
</div>
</body></html>"#,
            epub = EPUB_LINK_TITLE,
            txt = TXT_LINK_TITLE
        )
    }

    #[test]
    fn category_url_and_offsets() {
        assert_eq!(
            category_page_url("https://www.smashwords.com/", 1245, 40),
            "https://www.smashwords.com/books/category/1245/downloads/0/free/any/40"
        );
        assert_eq!(page_offsets(3, 20), vec![0, 20, 40]);
        assert!(page_offsets(0, 20).is_empty());
    }

    #[test]
    fn list_page_links_resolved_and_deduplicated() -> Result<(), ScraperError> {
        let base = parse_base_url(DEFAULT_BASE_URL)?;
        let links = parse_book_links(LIST_PAGE, &base)?;
        assert_eq!(
            links,
            vec![
                "https://www.smashwords.com/books/view/101".to_string(),
                "https://www.smashwords.com/books/view/202".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn book_page_title_and_links_per_format() -> Result<(), ScraperError> {
        let html = book_page();
        let txt = parse_book_page(&html, "https://x/books/view/101", DownloadFormat::Txt)?;
        assert_eq!(txt.title, "Lonesome Trail: A Western!");
        assert_eq!(
            txt.download_links,
            vec!["/books/download/101/2/latest/0/0/lonesome-trail.txt".to_string()]
        );
        let epub = parse_book_page(&html, "https://x/books/view/101", DownloadFormat::Epub)?;
        assert_eq!(epub.download_links.len(), 1);
        assert!(epub.download_links[0].ends_with(".epub"));
        Ok(())
    }

    #[test]
    fn book_page_without_container_errors() {
        let html = "<html><body><h1>x</h1></body></html>";
        let result = parse_book_page(html, "u", DownloadFormat::Txt);
        assert!(matches!(result, Err(ScraperError::ParsePage { .. })));
    }

    #[test]
    fn file_names_keep_word_characters_only() {
        assert_eq!(
            book_file_name("Lonesome Trail: A Western!", DownloadFormat::Txt).as_deref(),
            Some("LonesomeTrailAWestern.txt")
        );
        assert_eq!(
            book_file_name("snake_case 2", DownloadFormat::Epub).as_deref(),
            Some("snake_case2.epub")
        );
        assert_eq!(book_file_name("日本語の本", DownloadFormat::Txt), None);
        assert_eq!(book_file_name("", DownloadFormat::Txt), None);
    }

    #[test]
    fn throttle_marker_detection() {
        assert!(is_throttled(b"<html>Too Many Requests</html>", DEFAULT_THROTTLE_MARKER));
        assert!(!is_throttled(b"Chapter 1", DEFAULT_THROTTLE_MARKER));
        assert!(!is_throttled(b"anything", ""));
        assert!(!is_throttled(b"", "marker"));
    }

    #[test]
    fn summary_merge_adds_up() {
        let mut a = DownloadSummary::default();
        a.record(DownloadOutcome::Saved(PathBuf::from("data/a.txt")));
        a.record(DownloadOutcome::Untitled);
        let mut b = DownloadSummary {
            list_pages: 1,
            books_found: 3,
            failures: 1,
            ..Default::default()
        };
        b.record(DownloadOutcome::Planned(PathBuf::from("data/b.txt")));
        a.merge(b);
        assert_eq!(a.saved.len(), 1);
        assert_eq!(a.planned.len(), 1);
        assert_eq!(a.untitled, 1);
        assert_eq!(a.books_found, 3);
        assert_eq!(a.failures, 1);
    }

    #[test]
    fn untitled_download_is_skipped_without_request() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut client = PoliteClient::builder().delay_secs(0).build()?;
        let outcome = download_book(
            &mut client,
            "???",
            "http://127.0.0.1:9/never-fetched",
            dir.path(),
            DownloadFormat::Txt,
            DEFAULT_THROTTLE_MARKER,
        )?;
        assert_eq!(outcome, DownloadOutcome::Untitled);
        Ok(())
    }

    #[test]
    fn scrape_catalog_rejects_bad_base_url() {
        let options = CatalogOptions {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        let result = scrape_catalog(&options, &PoliteClientBuilder::default(), false);
        assert!(matches!(result, Err(ScraperError::InvalidUrl { .. })));
    }
}
