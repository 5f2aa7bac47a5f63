//! Tokenizing walker: drives the tokenizer, keeps the open-element stack, and dispatches
//! each token to the layout surface and the accumulated text output.

use super::style::resolve_style;
use super::surface::LayoutSurface;
use super::token::{MarkupToken, Tag, TagAttribute, TokenError, Tokenizer};
use crate::model::Manifest;
use std::io::BufRead;
use tracing::{debug, trace};

/// Why a walk ended early.
#[derive(Debug)]
pub(crate) enum Stop {
    /// End tag with nothing open, at this byte offset.
    Unbalanced { position: u64 },
    /// Markup the tokenizer could not read past. Text before it is kept.
    Malformed {
        position: u64,
        source: quick_xml::Error,
    },
    /// The underlying reader failed.
    Stream {
        position: u64,
        source: quick_xml::Error,
    },
}

pub(crate) struct Walker<'m, R> {
    tokenizer: Tokenizer<R>,
    stack: Vec<Tag>,
    surface: LayoutSurface,
    manifest: &'m Manifest,
    text: String,
}

impl<'m, R: BufRead> Walker<'m, R> {
    pub(crate) fn new(source: R, manifest: &'m Manifest, width: usize) -> Self {
        Self {
            tokenizer: Tokenizer::new(source),
            stack: Vec::with_capacity(16),
            surface: LayoutSurface::new(width),
            manifest,
            text: String::new(),
        }
    }

    /// Consume tokens until end of input, a tokenizer error, or a stack underflow.
    pub(crate) fn walk(&mut self) -> Result<(), Stop> {
        loop {
            match self.tokenizer.next_token() {
                MarkupToken::StartTag { tag, attributes } => {
                    self.stack.push(tag);
                    self.handle_start(tag, &attributes);
                }
                MarkupToken::SelfClosingTag { tag, attributes } => {
                    self.handle_start(tag, &attributes);
                }
                MarkupToken::EndTag { tag } => {
                    if self.stack.pop().is_none() {
                        let position = self.tokenizer.position();
                        debug!(?tag, position, "end tag with no open element");
                        return Err(Stop::Unbalanced { position });
                    }
                }
                MarkupToken::Text(text) => self.handle_text(&text),
                MarkupToken::Error(TokenError::EndOfStream) => return Ok(()),
                MarkupToken::Error(TokenError::Xml(source)) => {
                    let position = self.tokenizer.position();
                    if matches!(source, quick_xml::Error::Io(_)) {
                        return Err(Stop::Stream { position, source });
                    }
                    debug!(position, error = %source, "malformed markup; keeping text read so far");
                    return Err(Stop::Malformed { position, source });
                }
            }
        }
    }

    /// Open elements at this point of the walk.
    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    #[cfg(test)]
    pub(crate) fn surface(&self) -> &LayoutSurface {
        &self.surface
    }

    #[cfg(test)]
    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn finish(self) -> (String, LayoutSurface) {
        (self.text, self.surface)
    }

    fn handle_text(&mut self, text: &str) {
        if self.stack.last().is_some_and(|t| t.is_hidden()) {
            return;
        }
        self.surface.set_attribute(resolve_style(&self.stack));
        self.surface.append_text(text);
        self.text.push_str(text);
    }

    fn handle_start(&mut self, tag: Tag, attributes: &[TagAttribute]) {
        match tag {
            Tag::Img | Tag::Image => self.handle_image(attributes),
            Tag::Br => self.surface.line_break(),
            Tag::H1
            | Tag::H2
            | Tag::H3
            | Tag::H4
            | Tag::H5
            | Tag::H6
            | Tag::Title
            | Tag::Div
            | Tag::Tr => self.surface.block_break(),
            Tag::P => self.surface.paragraph_break(),
            Tag::Hr => self.surface.horizontal_rule(),
            _ => {}
        }
    }

    /// Alt text stands in for the image on the surface. Sources are looked up in the
    /// manifest; the match is only traced.
    fn handle_image(&mut self, attributes: &[TagAttribute]) {
        for attr in attributes {
            match attr.key.as_str() {
                "alt" => {
                    self.surface.append_text(&format!("Alt text: {}", attr.value));
                    self.surface.line_break();
                }
                "src" | "href" | "xlink:href" => {
                    if let Some(item) = self.manifest.by_href(&attr.value) {
                        trace!(id = %item.id, href = %item.href, "image source found in manifest");
                    }
                }
                _ => {}
            }
        }
    }
}
