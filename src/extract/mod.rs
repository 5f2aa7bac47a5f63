//! Section text extraction. Walks one chapter's markup, simulates its layout on a
//! fixed-width grid, and accumulates the raw text in reading order.
//!
//! The flat text is collected alongside the grid, not read back from it: the grid only
//! models the reading layout and is available through [`layout_section`].

mod error;
mod style;
mod surface;
mod token;
mod walker;

pub use error::ExtractError;
pub use style::{resolve_style, Attribute, Color};
pub use surface::{Cell, LayoutSurface, DEFAULT_WIDTH};
pub use token::{MarkupToken, Tag, TagAttribute, TokenError, Tokenizer};
pub(crate) use token::decode_value;

use crate::model::Manifest;
use std::io::BufRead;
use walker::{Stop, Walker};

/// Extraction settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Page width of the layout grid in columns.
    pub width: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
        }
    }
}

/// Why a walk stopped before the end of the section.
#[derive(Debug)]
pub enum Truncation {
    /// End tag with no open element at this byte offset.
    Unbalanced { position: u64 },
    /// Markup the tokenizer could not read past.
    Malformed {
        position: u64,
        source: quick_xml::Error,
    },
}

/// Result of walking one section.
#[derive(Debug)]
pub struct SectionLayout {
    /// Accumulated text output.
    pub text: String,
    /// Final state of the layout grid.
    pub surface: LayoutSurface,
    /// Set when the walk stopped early; `text` holds what was read before that point.
    pub truncated: Option<Truncation>,
    /// Elements still open when the walk ended.
    pub open_elements: usize,
}

/// Extract the plain text of one section with the default page width.
///
/// On unbalanced markup the error carries the text extracted so far
/// (see [`ExtractError::partial_text`]).
pub fn extract_section_text<R: BufRead>(
    reader: R,
    manifest: &Manifest,
) -> Result<String, ExtractError> {
    extract_section_text_with(reader, manifest, &ExtractOptions::default())
}

pub fn extract_section_text_with<R: BufRead>(
    reader: R,
    manifest: &Manifest,
    options: &ExtractOptions,
) -> Result<String, ExtractError> {
    let layout = layout_section(reader, manifest, options)?;
    match layout.truncated {
        Some(Truncation::Unbalanced { position }) => Err(ExtractError::Unbalanced {
            position,
            partial: layout.text,
        }),
        Some(Truncation::Malformed { position, source }) => Err(ExtractError::Malformed {
            position,
            source,
            partial: layout.text,
        }),
        None => Ok(layout.text),
    }
}

/// Walk one section and return both the text and the layout grid.
///
/// Unbalanced or malformed markup is not an error here: the walk stops and `truncated`
/// is set. Only a failure of the reader returns `Err`.
pub fn layout_section<R: BufRead>(
    reader: R,
    manifest: &Manifest,
    options: &ExtractOptions,
) -> Result<SectionLayout, ExtractError> {
    let mut walker = Walker::new(reader, manifest, options.width);
    let outcome = walker.walk();
    let open_elements = walker.depth();
    let (text, surface) = walker.finish();
    let truncated = match outcome {
        Ok(()) => None,
        Err(Stop::Unbalanced { position }) => Some(Truncation::Unbalanced { position }),
        Err(Stop::Malformed { position, source }) => {
            Some(Truncation::Malformed { position, source })
        }
        Err(Stop::Stream { position, source }) => {
            return Err(ExtractError::Stream { position, source });
        }
    };
    Ok(SectionLayout {
        text,
        surface,
        truncated,
        open_elements,
    })
}
