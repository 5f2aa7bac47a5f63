//! Conversion pass: flattens every EPUB in a directory into a `.txt` beside it.

use crate::epub::{EpubArchive, EpubError, EpubPackage, SpineItem};
use crate::extract::{
    extract_section_text_with, layout_section, ExtractError, ExtractOptions, Truncation,
    DEFAULT_WIDTH,
};
use crate::model::{BookReport, ConversionReport, Manifest};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How section text is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Converter {
    /// Accumulated text of the walk.
    #[default]
    Stream,
    /// Rendered layout grid.
    Grid,
    /// Section markup converted to Markdown.
    Markdown,
}

impl Converter {
    pub fn parse(s: &str) -> Option<Converter> {
        match s.to_lowercase().as_str() {
            "stream" | "text" => Some(Converter::Stream),
            "grid" | "layout" => Some(Converter::Grid),
            "markdown" | "md" => Some(Converter::Markdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub converter: Converter,
    /// Page width of the layout grid.
    pub width: usize,
    /// Delete the `.epub` once its text is written.
    pub remove_source: bool,
    /// Leave books alone whose `.txt` already exists.
    pub skip_existing: bool,
    /// Books converted at once.
    pub jobs: usize,
    pub show_progress: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            converter: Converter::Stream,
            width: DEFAULT_WIDTH,
            remove_source: true,
            skip_existing: false,
            jobs: 1,
            show_progress: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Cannot read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Epub(#[from] EpubError),

    #[error("Cannot create output {path}: {source}")]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No section of {path} could be read ({skipped} skipped)")]
    NoReadableSections { path: PathBuf, skipped: usize },

    #[error("Failed to write report {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode report: {0}")]
    ReportJson(#[from] serde_json::Error),
}

/// Output path for a source EPUB.
pub fn output_path_for(source: &Path) -> PathBuf {
    source.with_extension("txt")
}

/// Where a book's text is written before it is renamed into place.
fn partial_path_for(output: &Path) -> PathBuf {
    output.with_extension("txt.part")
}

/// `*.epub` files directly inside `dir`, sorted by name.
pub fn list_epubs(dir: &Path) -> Result<Vec<PathBuf>, ConvertError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ConvertError::ReadDir {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut books: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("epub"))
        })
        .collect();
    books.sort();
    Ok(books)
}

enum SectionText {
    Complete(String),
    Truncated(String),
    Skipped,
}

fn section_text(
    archive: &mut EpubArchive,
    item: &SpineItem,
    manifest: &Manifest,
    options: &ConvertOptions,
) -> SectionText {
    let extract = ExtractOptions {
        width: options.width,
    };
    match options.converter {
        Converter::Stream => {
            let section = match archive.open_section(item) {
                Ok(section) => section,
                Err(e) => {
                    warn!(section = %item.path, error = %e, "section unreadable; skipped");
                    return SectionText::Skipped;
                }
            };
            match extract_section_text_with(section, manifest, &extract) {
                Ok(text) => SectionText::Complete(text),
                Err(e @ ExtractError::Stream { .. }) => {
                    warn!(section = %item.path, error = %e, "section skipped");
                    SectionText::Skipped
                }
                Err(e) => {
                    warn!(section = %item.path, error = %e, "keeping partial text");
                    SectionText::Truncated(e.into_partial_text().unwrap_or_default())
                }
            }
        }
        Converter::Grid => {
            let section = match archive.open_section(item) {
                Ok(section) => section,
                Err(e) => {
                    warn!(section = %item.path, error = %e, "section unreadable; skipped");
                    return SectionText::Skipped;
                }
            };
            match layout_section(section, manifest, &extract) {
                Ok(layout) => {
                    let mut text = layout.surface.render();
                    text.push('\n');
                    match layout.truncated {
                        Some(Truncation::Unbalanced { position }) => {
                            warn!(section = %item.path, position, "unbalanced markup; keeping partial layout");
                            SectionText::Truncated(text)
                        }
                        Some(Truncation::Malformed { position, source }) => {
                            warn!(section = %item.path, position, error = %source, "malformed markup; keeping partial layout");
                            SectionText::Truncated(text)
                        }
                        None => SectionText::Complete(text),
                    }
                }
                Err(e) => {
                    warn!(section = %item.path, error = %e, "section skipped");
                    SectionText::Skipped
                }
            }
        }
        Converter::Markdown => match archive.read_section(item) {
            Ok(markup) => {
                let mut text = html2md::parse_html(&markup);
                text.push_str("\n\n");
                SectionText::Complete(text)
            }
            Err(e) => {
                warn!(section = %item.path, error = %e, "section unreadable; skipped");
                SectionText::Skipped
            }
        },
    }
}

/// Convert one EPUB into `<stem>.txt` beside it.
pub fn convert_book(path: &Path, options: &ConvertOptions) -> Result<BookReport, ConvertError> {
    let output = output_path_for(path);
    let mut report = BookReport {
        source: path.to_path_buf(),
        ..Default::default()
    };

    if options.skip_existing && output.exists() {
        debug!(output = %output.display(), "output exists; skipped");
        report.output = Some(output);
        report.skipped_existing = true;
        if options.remove_source {
            report.source_removed = remove_source(path);
        }
        return Ok(report);
    }

    let mut archive = EpubArchive::open(path)?;
    let package = archive.package().clone();
    report.title = package.title.clone();
    report.author = package.author.clone();

    let partial = partial_path_for(&output);
    if let Err(e) = write_book_text(&mut archive, &package, &partial, options, &mut report) {
        discard_partial(&partial);
        return Err(e);
    }
    if report.sections + report.truncated_sections == 0 && report.skipped_sections > 0 {
        discard_partial(&partial);
        return Err(ConvertError::NoReadableSections {
            path: path.to_path_buf(),
            skipped: report.skipped_sections,
        });
    }
    if let Err(e) = std::fs::rename(&partial, &output) {
        discard_partial(&partial);
        return Err(ConvertError::Write {
            path: output,
            source: e,
        });
    }

    info!(
        book = %path.display(),
        title = report.title.as_deref().unwrap_or(""),
        author = report.author.as_deref().unwrap_or(""),
        sections = report.sections,
        truncated = report.truncated_sections,
        skipped = report.skipped_sections,
        characters = report.characters,
        "converted"
    );
    report.output = Some(output);
    if options.remove_source {
        if report.skipped_sections > 0 {
            warn!(
                source = %path.display(),
                skipped = report.skipped_sections,
                "sections were skipped; source kept"
            );
        } else {
            report.source_removed = remove_source(path);
        }
    }
    Ok(report)
}

/// Write every spine section's text to `dest`, counting outcomes into `report`.
fn write_book_text(
    archive: &mut EpubArchive,
    package: &EpubPackage,
    dest: &Path,
    options: &ConvertOptions,
    report: &mut BookReport,
) -> Result<(), ConvertError> {
    let file = File::create(dest).map_err(|e| ConvertError::CreateOutput {
        path: dest.to_path_buf(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);
    let write_error = |e| ConvertError::Write {
        path: dest.to_path_buf(),
        source: e,
    };

    for item in &package.spine {
        let text = match section_text(archive, item, &package.manifest, options) {
            SectionText::Complete(text) => {
                report.sections += 1;
                text
            }
            SectionText::Truncated(text) => {
                report.truncated_sections += 1;
                text
            }
            SectionText::Skipped => {
                report.skipped_sections += 1;
                continue;
            }
        };
        let text = text.replace('\t', "");
        report.characters += text.chars().count();
        writer.write_all(text.as_bytes()).map_err(write_error)?;
    }
    writer.flush().map_err(write_error)
}

fn discard_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove partial output");
        }
    }
}

fn remove_source(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            warn!(source = %path.display(), error = %e, "could not remove source");
            false
        }
    }
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
    bar.set_message("Converting");
    bar
}

/// Convert every EPUB in `dir`. A book that fails is recorded in the report and the
/// pass moves on.
pub fn convert_directory(
    dir: &Path,
    options: &ConvertOptions,
) -> Result<ConversionReport, ConvertError> {
    let books = list_epubs(dir)?;
    let started = Instant::now();
    let bar = progress_bar(books.len(), options.show_progress);
    let jobs = options.jobs.clamp(1, books.len().max(1));
    let next = AtomicUsize::new(0);

    let mut indexed: Vec<(usize, BookReport)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..jobs)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(path) = books.get(index) else {
                            break;
                        };
                        let report = convert_book(path, options).unwrap_or_else(|e| {
                            warn!(book = %path.display(), error = %e, "book not converted");
                            BookReport {
                                source: path.clone(),
                                error: Some(e.to_string()),
                                ..Default::default()
                            }
                        });
                        bar.inc(1);
                        done.push((index, report));
                    }
                    done
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
            })
            .collect()
    });
    bar.finish_and_clear();
    indexed.sort_by_key(|(index, _)| *index);

    let books: Vec<BookReport> = indexed.into_iter().map(|(_, report)| report).collect();
    let characters: usize = books.iter().map(|b| b.characters).sum();
    let elapsed_secs = started.elapsed().as_secs_f64();
    let chars_per_sec = if elapsed_secs > 0.0 {
        (characters as f64 / elapsed_secs).round() as u64
    } else {
        characters as u64
    };
    let report = ConversionReport {
        books,
        characters,
        elapsed_secs,
        chars_per_sec,
    };
    info!(
        books = report.converted(),
        failed = report.failed(),
        characters,
        elapsed_secs,
        chars_per_sec,
        "conversion pass finished"
    );
    Ok(report)
}

/// Write the report as pretty JSON.
pub fn write_report(report: &ConversionReport, path: &Path) -> Result<(), ConvertError> {
    let file = File::create(path).map_err(|e| ConvertError::Report {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.flush().map_err(|e| ConvertError::Report {
        path: path.to_path_buf(),
        source: e,
    })
}
