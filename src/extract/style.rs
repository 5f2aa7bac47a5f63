//! Style resolution: maps the open-element stack to a display attribute for the next text run.

use super::token::Tag;

/// Foreground colour category. Only one applies at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Color {
    #[default]
    Default,
    Red,
    Yellow,
    Magenta,
    Blue,
    Cyan,
}

/// Display attribute recorded on each grid cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attribute {
    pub bold: bool,
    pub color: Color,
}

/// Resolve the attribute for text appended under `stack` (outermost element first).
///
/// Bold is a flag that any bold-like entry turns on. Colour is overwritten by every
/// later entry that carries one, so the innermost coloured element wins.
pub fn resolve_style(stack: &[Tag]) -> Attribute {
    let mut attr = Attribute::default();
    for tag in stack {
        match tag {
            Tag::B | Tag::Strong | Tag::Em => attr.bold = true,
            Tag::I => attr.color = Color::Yellow,
            Tag::Title => attr.color = Color::Red,
            Tag::H1 => attr.color = Color::Magenta,
            Tag::H2 => attr.color = Color::Blue,
            Tag::H3 | Tag::H4 | Tag::H5 | Tag::H6 => attr.color = Color::Cyan,
            _ => {}
        }
    }
    attr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stack_is_default() {
        assert_eq!(resolve_style(&[]), Attribute::default());
    }

    #[test]
    fn heading_and_bold_combine() {
        let attr = resolve_style(&[Tag::H1, Tag::B]);
        assert!(attr.bold);
        assert_eq!(attr.color, Color::Magenta);
    }

    #[test]
    fn lower_headings_share_a_colour() {
        for tag in [Tag::H3, Tag::H4, Tag::H5, Tag::H6] {
            assert_eq!(resolve_style(&[tag]).color, Color::Cyan);
        }
        assert_eq!(resolve_style(&[Tag::H2]).color, Color::Blue);
    }

    #[test]
    fn innermost_colour_wins() {
        let attr = resolve_style(&[Tag::Title, Tag::I]);
        assert_eq!(attr.color, Color::Yellow);
        let attr = resolve_style(&[Tag::I, Tag::Title]);
        assert_eq!(attr.color, Color::Red);
    }

    #[test]
    fn unrelated_tags_do_not_style() {
        let attr = resolve_style(&[Tag::Div, Tag::P, Tag::Other]);
        assert_eq!(attr, Attribute::default());
    }

    #[test]
    fn em_and_strong_are_bold() {
        assert!(resolve_style(&[Tag::Em]).bold);
        assert!(resolve_style(&[Tag::P, Tag::Strong]).bold);
    }
}
