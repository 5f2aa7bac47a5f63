//! Streaming markup tokenizer. Wraps quick-xml in a lenient configuration and hands out one
//! owned token at a time; nothing is retained between calls except the read buffer.
//!
//! Input is read the way an HTML tokenizer reads it where XML would refuse: a `<` that
//! cannot open markup is text, a bare `&` is text, and markup left open at end of input
//! ends the stream instead of failing it.

use quick_xml::errors::SyntaxError;
use quick_xml::escape::{resolve_html5_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::borrow::Cow;
use std::io::{self, BufRead, Read};
use tracing::debug;

/// Element-name identifier kept on the element stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    B,
    Strong,
    Em,
    I,
    Title,
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
    Div,
    Tr,
    P,
    Br,
    Hr,
    Img,
    /// SVG `<image>`, treated like `<img>`.
    Image,
    Style,
    Script,
    Other,
}

impl Tag {
    /// Map a lowercased local element name to its identifier.
    pub fn from_name(name: &str) -> Tag {
        match name {
            "b" => Tag::B,
            "strong" => Tag::Strong,
            "em" => Tag::Em,
            "i" => Tag::I,
            "title" => Tag::Title,
            "h1" => Tag::H1,
            "h2" => Tag::H2,
            "h3" => Tag::H3,
            "h4" => Tag::H4,
            "h5" => Tag::H5,
            "h6" => Tag::H6,
            "div" => Tag::Div,
            "tr" => Tag::Tr,
            "p" => Tag::P,
            "br" => Tag::Br,
            "hr" => Tag::Hr,
            "img" => Tag::Img,
            "image" => Tag::Image,
            "style" => Tag::Style,
            "script" => Tag::Script,
            _ => Tag::Other,
        }
    }

    /// Text directly inside these elements is never displayed.
    pub fn is_hidden(self) -> bool {
        matches!(self, Tag::Style | Tag::Script)
    }
}

/// One attribute of a start or self-closing tag. `key` is lowercased and keeps any prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagAttribute {
    pub key: String,
    pub value: String,
}

/// Why the token stream stopped.
#[derive(Debug)]
pub enum TokenError {
    EndOfStream,
    Xml(quick_xml::Error),
}

#[derive(Debug)]
pub enum MarkupToken {
    StartTag {
        tag: Tag,
        attributes: Vec<TagAttribute>,
    },
    SelfClosingTag {
        tag: Tag,
        attributes: Vec<TagAttribute>,
    },
    EndTag {
        tag: Tag,
    },
    Text(String),
    Error(TokenError),
}

pub struct Tokenizer<R> {
    reader: Reader<LooseLt<R>>,
    buf: Vec<u8>,
    finished: bool,
}

impl<R: BufRead> Tokenizer<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(LooseLt::new(source));
        let config = reader.config_mut();
        config.trim_text(false);
        // The walker owns nesting; quick-xml must not reject mismatched or stray end tags.
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.allow_dangling_amp = true;
        Self {
            reader,
            buf: Vec::with_capacity(256),
            finished: false,
        }
    }

    /// Byte offset of the reader in the source stream.
    pub fn position(&self) -> u64 {
        self.reader.get_ref().source_offset(self.reader.buffer_position())
    }

    /// Produce the next token. After `Error` has been returned, every later call returns
    /// `Error(EndOfStream)`.
    pub fn next_token(&mut self) -> MarkupToken {
        if self.finished {
            return MarkupToken::Error(TokenError::EndOfStream);
        }
        loop {
            self.buf.clear();
            let token = match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(e)) => MarkupToken::StartTag {
                    tag: tag_of(&e),
                    attributes: attributes_of(&e),
                },
                Ok(Event::Empty(e)) => MarkupToken::SelfClosingTag {
                    tag: tag_of(&e),
                    attributes: attributes_of(&e),
                },
                Ok(Event::End(e)) => MarkupToken::EndTag {
                    tag: Tag::from_name(&lowercase_name(e.local_name().as_ref())),
                },
                Ok(Event::Text(e)) => MarkupToken::Text(String::from_utf8_lossy(&e).into_owned()),
                Ok(Event::CData(e)) => {
                    MarkupToken::Text(String::from_utf8_lossy(&e).into_owned())
                }
                Ok(Event::GeneralRef(e)) => {
                    let name = String::from_utf8_lossy(&e);
                    MarkupToken::Text(resolve_reference(&name))
                }
                Ok(Event::Eof) => {
                    self.finished = true;
                    MarkupToken::Error(TokenError::EndOfStream)
                }
                Ok(_) => continue,
                Err(quick_xml::Error::Syntax(err)) if ends_inside_markup(&err) => {
                    let position = self.reader.get_ref().source_offset(self.reader.buffer_position());
                    debug!(position, error = %err, "input ends inside markup");
                    self.finished = true;
                    MarkupToken::Error(TokenError::EndOfStream)
                }
                Err(err) => {
                    self.finished = true;
                    MarkupToken::Error(TokenError::Xml(err))
                }
            };
            return token;
        }
    }
}

/// Syntax errors quick-xml only raises on reaching end of input inside a comment, tag,
/// CDATA section, doctype or processing instruction.
fn ends_inside_markup(err: &SyntaxError) -> bool {
    !matches!(err, SyntaxError::InvalidBangMarkup)
}

/// A `<` opens markup only before an ASCII letter, `/`, `!` or `?`.
fn opens_markup(next: u8) -> bool {
    next.is_ascii_alphabetic() || matches!(next, b'/' | b'!' | b'?')
}

const ESCAPED_LT: &[u8] = b"&lt;";

/// Reader adapter that rewrites every `<` which cannot open markup into `&lt;`, so
/// `x < y` reaches quick-xml as text instead of the start of a tag.
pub(crate) struct LooseLt<R> {
    inner: R,
    out: Vec<u8>,
    pos: usize,
    /// Output offset of `out[0]`.
    base: u64,
    /// A `<` ended the last chunk; the next byte decides it.
    held_lt: bool,
    /// Output offsets of each rewritten `<`, ascending.
    rewrites: Vec<u64>,
}

impl<R: BufRead> LooseLt<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            out: Vec::with_capacity(8 * 1024),
            pos: 0,
            base: 0,
            held_lt: false,
            rewrites: Vec::new(),
        }
    }

    /// Map an offset in the rewritten stream back to the byte offset in the source.
    pub(crate) fn source_offset(&self, offset: u64) -> u64 {
        let before = self.rewrites.partition_point(|&at| at < offset) as u64;
        let extra = (ESCAPED_LT.len() as u64 - 1) * before;
        offset.saturating_sub(extra)
    }
}

fn push_lt(out: &mut Vec<u8>, rewrites: &mut Vec<u64>, base: u64, opens: bool) {
    if opens {
        out.push(b'<');
    } else {
        rewrites.push(base + out.len() as u64);
        out.extend_from_slice(ESCAPED_LT);
    }
}

impl<R: BufRead> BufRead for LooseLt<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.pos >= self.out.len() {
            self.base += self.out.len() as u64;
            self.out.clear();
            self.pos = 0;
            let chunk = self.inner.fill_buf()?;
            if chunk.is_empty() {
                if self.held_lt {
                    self.held_lt = false;
                    push_lt(&mut self.out, &mut self.rewrites, self.base, false);
                }
                break;
            }
            for &byte in chunk {
                if self.held_lt {
                    self.held_lt = false;
                    push_lt(&mut self.out, &mut self.rewrites, self.base, opens_markup(byte));
                }
                if byte == b'<' {
                    self.held_lt = true;
                } else {
                    self.out.push(byte);
                }
            }
            let consumed = chunk.len();
            self.inner.consume(consumed);
        }
        Ok(&self.out[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.out.len());
    }
}

impl<R: BufRead> Read for LooseLt<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

fn lowercase_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

fn tag_of(e: &BytesStart<'_>) -> Tag {
    Tag::from_name(&lowercase_name(e.local_name().as_ref()))
}

fn attributes_of(e: &BytesStart<'_>) -> Vec<TagAttribute> {
    e.html_attributes()
        .flatten()
        .map(|attr| TagAttribute {
            key: lowercase_name(attr.key.as_ref()),
            value: decode_value(&attr.value),
        })
        .collect()
}

/// Decode an attribute value, resolving entity references. Undecodable references are
/// kept as written.
pub(crate) fn decode_value(raw: &[u8]) -> String {
    let raw = String::from_utf8_lossy(raw);
    let unescaped = unescape_with(&raw, resolve_html5_entity).map(Cow::into_owned);
    unescaped.unwrap_or_else(|_| raw.into_owned())
}

/// Resolve `&name;` (named or numeric). Unknown references are kept as written.
fn resolve_reference(name: &str) -> String {
    let literal = format!("&{};", name);
    let resolved = match unescape_with(&literal, resolve_html5_entity) {
        Ok(Cow::Owned(s)) => Some(s),
        _ => None,
    };
    resolved.unwrap_or(literal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(src: &str) -> Vec<MarkupToken> {
        collect_from(src.as_bytes())
    }

    fn collect_from<R: BufRead>(source: R) -> Vec<MarkupToken> {
        let mut tokenizer = Tokenizer::new(source);
        let mut out = Vec::new();
        loop {
            let token = tokenizer.next_token();
            let stop = matches!(token, MarkupToken::Error(_));
            out.push(token);
            if stop {
                break;
            }
        }
        out
    }

    #[test]
    fn start_text_end_and_eof() {
        let tokens = collect("<p>Hi</p>");
        assert!(matches!(tokens[0], MarkupToken::StartTag { tag: Tag::P, .. }));
        assert!(matches!(&tokens[1], MarkupToken::Text(t) if t == "Hi"));
        assert!(matches!(tokens[2], MarkupToken::EndTag { tag: Tag::P }));
        assert!(matches!(
            tokens[3],
            MarkupToken::Error(TokenError::EndOfStream)
        ));
        assert_eq!(tokens.len(), 4);
    }

    #[test]
    fn self_closing_carries_attributes() {
        let tokens = collect(r#"<img src="a.png" ALT="A cat"/>"#);
        match &tokens[0] {
            MarkupToken::SelfClosingTag { tag, attributes } => {
                assert_eq!(*tag, Tag::Img);
                assert_eq!(attributes.len(), 2);
                assert_eq!(attributes[1].key, "alt");
                assert_eq!(attributes[1].value, "A cat");
            }
            other => panic!("unexpected token {:?}", other),
        }
    }

    #[test]
    fn namespaced_and_uppercase_names_map_to_local_tag() {
        let tokens = collect("<xhtml:H1>x</xhtml:H1>");
        assert!(matches!(tokens[0], MarkupToken::StartTag { tag: Tag::H1, .. }));
        assert!(matches!(tokens[2], MarkupToken::EndTag { tag: Tag::H1 }));
    }

    #[test]
    fn entities_become_text() {
        let tokens = collect("<p>a&amp;b&nbsp;&#8217;&bogus;</p>");
        let text: String = tokens
            .iter()
            .filter_map(|t| match t {
                MarkupToken::Text(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "a&b\u{a0}\u{2019}&bogus;");
    }

    fn text_of(tokens: &[MarkupToken]) -> String {
        tokens
            .iter()
            .filter_map(|t| match t {
                MarkupToken::Text(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    fn end_tags(tokens: &[MarkupToken]) -> usize {
        tokens
            .iter()
            .filter(|t| matches!(t, MarkupToken::EndTag { .. }))
            .count()
    }

    #[test]
    fn bare_ampersand_is_text() {
        let tokens = collect("<p>Fish &amp; chips</p><p>AT&T & co</p><p>after</p>");
        assert_eq!(text_of(&tokens), "Fish & chipsAT&T & coafter");
        assert_eq!(end_tags(&tokens), 3);
        assert!(!tokens
            .iter()
            .any(|t| matches!(t, MarkupToken::Error(TokenError::Xml(_)))));
    }

    #[test]
    fn less_than_before_space_is_text() {
        let tokens = collect("<p>First</p><p>x < y holds</p><p>after</p>");
        assert_eq!(text_of(&tokens), "Firstx < y holdsafter");
        assert_eq!(end_tags(&tokens), 3);
    }

    #[test]
    fn less_than_split_across_reads() {
        let src = "<p>1 < 2</p><p>3 <</p>";
        let tokens = collect_from(io::BufReader::with_capacity(1, src.as_bytes()));
        assert_eq!(text_of(&tokens), "1 < 23 <");
        assert_eq!(end_tags(&tokens), 2);
    }

    #[test]
    fn trailing_less_than_is_text() {
        let tokens = collect("<p>a</p>b <");
        assert_eq!(text_of(&tokens), "ab <");
    }

    #[test]
    fn rewritten_stream_maps_back_to_source_offsets() -> io::Result<()> {
        let mut loose = LooseLt::new("a < b <p>".as_bytes());
        let mut rewritten = String::new();
        loose.read_to_string(&mut rewritten)?;
        assert_eq!(rewritten, "a &lt; b <p>");
        assert_eq!(loose.source_offset(2), 2);
        assert_eq!(loose.source_offset(rewritten.len() as u64), 9);
        Ok(())
    }

    #[test]
    fn unclosed_comment_ends_the_stream() {
        let tokens = collect("<p>kept</p><!-- open");
        assert_eq!(text_of(&tokens), "kept");
        assert!(matches!(
            tokens.last(),
            Some(MarkupToken::Error(TokenError::EndOfStream))
        ));
    }

    #[test]
    fn invalid_bang_markup_is_an_error() {
        let tokens = collect("<p>kept</p><!x><p>lost</p>");
        assert!(matches!(
            tokens.last(),
            Some(MarkupToken::Error(TokenError::Xml(_)))
        ));
    }

    #[test]
    fn comments_and_declarations_are_skipped() {
        let tokens = collect(r#"<?xml version="1.0"?><!DOCTYPE html><!-- note --><br/>"#);
        assert!(matches!(
            tokens[0],
            MarkupToken::SelfClosingTag { tag: Tag::Br, .. }
        ));
    }

    #[test]
    fn stray_end_tag_is_passed_through() {
        let tokens = collect("</div>text");
        assert!(matches!(tokens[0], MarkupToken::EndTag { tag: Tag::Div }));
    }

    #[test]
    fn whitespace_text_is_preserved() {
        let tokens = collect("<b>a</b> <i>b</i>");
        assert!(matches!(&tokens[3], MarkupToken::Text(t) if t == " "));
    }

    #[test]
    fn unknown_tag_is_other() {
        assert_eq!(Tag::from_name("span"), Tag::Other);
        assert!(Tag::Style.is_hidden());
        assert!(Tag::Script.is_hidden());
        assert!(!Tag::P.is_hidden());
    }
}
