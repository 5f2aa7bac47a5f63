//! EPUB reader. Opens the zip container, follows container.xml to the package document,
//! and exposes metadata, manifest, and spine. Sections are streamed out of the archive.

use crate::extract::decode_value;
use crate::model::{Manifest, ManifestItem};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use zip::result::ZipError;
use zip::ZipArchive;

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Errors from opening or reading an EPUB.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot open EPUB {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid EPUB archive: {0}")]
    Zip(#[from] ZipError),

    #[error("EPUB is missing {name}")]
    MissingEntry { name: String },

    #[error("Failed to read {name} from EPUB: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("container.xml names no rootfile")]
    NoRootfile,

    #[error("Invalid XML in {name}: {source}")]
    Xml {
        name: String,
        #[source]
        source: quick_xml::Error,
    },

    #[error("Package document has an empty spine")]
    EmptySpine,
}

/// One entry of the reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    pub idref: String,
    /// Manifest href, relative to the package document.
    pub href: String,
    /// Archive path of the section.
    pub path: String,
}

/// Parsed package document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpubPackage {
    pub title: Option<String>,
    pub author: Option<String>,
    /// Archive path of the package document.
    pub opf_path: String,
    pub manifest: Manifest,
    pub spine: Vec<SpineItem>,
}

/// An open EPUB file.
pub struct EpubArchive {
    path: PathBuf,
    zip: ZipArchive<File>,
    package: EpubPackage,
}

impl std::fmt::Debug for EpubArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpubArchive")
            .field("path", &self.path)
            .field("package", &self.package)
            .finish()
    }
}

impl EpubArchive {
    /// Open an EPUB and parse its container and package documents.
    pub fn open(path: &Path) -> Result<Self, EpubError> {
        let file = File::open(path).map_err(|e| EpubError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut zip = ZipArchive::new(file)?;
        let container = read_entry(&mut zip, CONTAINER_PATH)?;
        let opf_path = parse_container(&container)?;
        let opf = read_entry(&mut zip, &opf_path)?;
        let package = parse_package(&opf, &opf_path)?;
        Ok(Self {
            path: path.to_path_buf(),
            zip,
            package,
        })
    }

    pub fn package(&self) -> &EpubPackage {
        &self.package
    }

    /// Buffered stream over one section's markup.
    pub fn open_section(&mut self, item: &SpineItem) -> Result<impl BufRead + '_, EpubError> {
        let entry = self.zip.by_name(&item.path).map_err(|e| match e {
            ZipError::FileNotFound => EpubError::MissingEntry {
                name: item.path.clone(),
            },
            other => EpubError::Zip(other),
        })?;
        Ok(BufReader::new(entry))
    }

    /// Whole section markup as a string (invalid UTF-8 replaced).
    pub fn read_section(&mut self, item: &SpineItem) -> Result<String, EpubError> {
        let bytes = read_entry(&mut self.zip, &item.path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn read_entry(zip: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>, EpubError> {
    let mut entry = zip.by_name(name).map_err(|e| match e {
        ZipError::FileNotFound => EpubError::MissingEntry {
            name: name.to_string(),
        },
        other => EpubError::Zip(other),
    })?;
    let mut out = Vec::new();
    entry
        .read_to_end(&mut out)
        .map_err(|e| EpubError::Read {
            name: name.to_string(),
            source: e,
        })?;
    Ok(out)
}

fn local_name(e: &BytesStart<'_>) -> Vec<u8> {
    e.local_name().as_ref().to_ascii_lowercase()
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref().eq_ignore_ascii_case(key))
        .map(|a| decode_value(&a.value))
}

/// Archive path of the first rootfile named in container.xml.
pub fn parse_container(xml: &[u8]) -> Result<String, EpubError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if local_name(&e) == b"rootfile" {
                    if let Some(path) = attribute(&e, b"full-path").filter(|p| !p.is_empty()) {
                        return Ok(path);
                    }
                }
            }
            Ok(Event::Eof) => return Err(EpubError::NoRootfile),
            Ok(_) => {}
            Err(e) => {
                return Err(EpubError::Xml {
                    name: CONTAINER_PATH.to_string(),
                    source: e,
                })
            }
        }
        buf.clear();
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MetaField {
    Title,
    Creator,
}

/// Parse a package document (OPF) located at `opf_path` inside the archive.
pub fn parse_package(xml: &[u8], opf_path: &str) -> Result<EpubPackage, EpubError> {
    let opf_dir = match opf_path.rfind('/') {
        Some(i) => &opf_path[..i + 1],
        None => "",
    };
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut title: Option<String> = None;
    let mut author: Option<String> = None;
    let mut field: Option<MetaField> = None;
    let mut field_text = String::new();
    let mut items = Vec::new();
    let mut idrefs = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match local_name(&e).as_slice() {
                b"title" if title.is_none() => {
                    field = Some(MetaField::Title);
                    field_text.clear();
                }
                b"creator" if author.is_none() => {
                    field = Some(MetaField::Creator);
                    field_text.clear();
                }
                b"item" => items.extend(manifest_item(&e)),
                b"itemref" => idrefs.extend(attribute(&e, b"idref")),
                _ => {}
            },
            Ok(Event::Empty(e)) => match local_name(&e).as_slice() {
                b"item" => items.extend(manifest_item(&e)),
                b"itemref" => idrefs.extend(attribute(&e, b"idref")),
                _ => {}
            },
            Ok(Event::Text(e)) if field.is_some() => {
                field_text.push_str(&String::from_utf8_lossy(&e));
            }
            Ok(Event::GeneralRef(e)) if field.is_some() => {
                let literal = format!("&{};", String::from_utf8_lossy(&e));
                field_text.push_str(&decode_value(literal.as_bytes()));
            }
            Ok(Event::End(_)) => {
                if let Some(f) = field.take() {
                    let value = field_text.trim().to_string();
                    if !value.is_empty() {
                        match f {
                            MetaField::Title => title = Some(value),
                            MetaField::Creator => author = Some(value),
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(EpubError::Xml {
                    name: opf_path.to_string(),
                    source: e,
                })
            }
        }
        buf.clear();
    }

    let manifest = Manifest { items };
    let mut spine = Vec::with_capacity(idrefs.len());
    for idref in idrefs {
        match manifest.by_id(&idref) {
            Some(item) => spine.push(SpineItem {
                path: resolve_path(opf_dir, &item.href),
                href: item.href.clone(),
                idref,
            }),
            None => warn!(%idref, opf = %opf_path, "spine entry not in manifest; skipped"),
        }
    }
    if spine.is_empty() {
        return Err(EpubError::EmptySpine);
    }

    Ok(EpubPackage {
        title,
        author,
        opf_path: opf_path.to_string(),
        manifest,
        spine,
    })
}

fn manifest_item(e: &BytesStart<'_>) -> Option<ManifestItem> {
    Some(ManifestItem {
        id: attribute(e, b"id")?,
        href: attribute(e, b"href")?,
        media_type: attribute(e, b"media-type").unwrap_or_default(),
    })
}

/// Resolve a manifest href against the package directory into an archive path.
/// Fragments are dropped, percent-escapes decoded, and `.`/`..` segments normalised.
pub fn resolve_path(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let decoded = percent_decode(href);
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
