//! Section extraction errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The markup stream could not be read further. Nothing from the section is kept.
    #[error("Could not read section markup at byte {position}: {source}")]
    Stream {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    /// An end tag had no open element. `partial` is the text extracted before it.
    #[error("Unbalanced markup: end tag at byte {position} has no open element ({} characters recovered)", .partial.chars().count())]
    Unbalanced { position: u64, partial: String },

    /// Markup that could not be tokenized further. `partial` is the text extracted before it.
    #[error("Malformed markup at byte {position} ({} characters recovered): {source}", .partial.chars().count())]
    Malformed {
        position: u64,
        #[source]
        source: quick_xml::Error,
        partial: String,
    },
}

impl ExtractError {
    /// Text that is still usable despite the error.
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            ExtractError::Unbalanced { partial, .. } | ExtractError::Malformed { partial, .. } => {
                Some(partial)
            }
            ExtractError::Stream { .. } => None,
        }
    }

    /// Consume the error, keeping the recovered text if there is any.
    pub fn into_partial_text(self) -> Option<String> {
        match self {
            ExtractError::Unbalanced { partial, .. } | ExtractError::Malformed { partial, .. } => {
                Some(partial)
            }
            ExtractError::Stream { .. } => None,
        }
    }
}
