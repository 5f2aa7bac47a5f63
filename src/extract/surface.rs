//! Layout surface: a growable character grid with a cursor, used to simulate how a section
//! would be laid out on a fixed-width terminal page.

use super::style::Attribute;

/// Default page width in columns.
pub const DEFAULT_WIDTH: usize = 80;

/// The grid grows by this many cells whenever a write lands past its end.
const GROW_CELLS: usize = 1024;

/// Character used for horizontal rules.
const RULE_CHAR: char = '-';

/// One grid position. `ch == '\0'` marks a cell that was never written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub attr: Attribute,
}

#[derive(Debug, Clone)]
pub struct LayoutSurface {
    cells: Vec<Cell>,
    width: usize,
    lmargin: usize,
    col: usize,
    row: usize,
    /// A word was placed on this row since the last column reset; the next word owes a space.
    space: bool,
    attr: Attribute,
}

impl Default for LayoutSurface {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH)
    }
}

impl LayoutSurface {
    /// Empty surface `width` columns wide (at least one column).
    pub fn new(width: usize) -> Self {
        Self {
            cells: Vec::new(),
            width: width.max(1),
            lmargin: 0,
            col: 0,
            row: 0,
            space: false,
            attr: Attribute::default(),
        }
    }

    pub fn col(&self) -> usize {
        self.col
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn left_margin(&self) -> usize {
        self.lmargin
    }

    pub fn set_left_margin(&mut self, margin: usize) {
        self.lmargin = margin;
    }

    /// Attribute applied to cells written from now on.
    pub fn set_attribute(&mut self, attr: Attribute) {
        self.attr = attr;
    }

    /// Number of cells currently allocated.
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Advance one row and return to the left margin.
    pub fn line_break(&mut self) {
        self.advance_rows(1);
    }

    /// Advance two rows and return to the left margin (headings, divisions, table rows).
    pub fn block_break(&mut self) {
        self.advance_rows(2);
    }

    /// Block break followed by a two-column paragraph indent.
    pub fn paragraph_break(&mut self) {
        self.advance_rows(2);
        self.col += 2;
    }

    /// Advance one row, move to column 0 and draw a full-width rule.
    pub fn horizontal_rule(&mut self) {
        self.row += 1;
        self.col = 0;
        self.space = false;
        let rule: String = std::iter::repeat(RULE_CHAR).take(self.width).collect();
        self.append_text(&rule);
    }

    fn advance_rows(&mut self, rows: usize) {
        self.row += rows;
        self.col = self.lmargin;
        self.space = false;
    }

    /// Place `text` word by word with greedy wrapping. Whitespace only separates words.
    ///
    /// A word that does not fit in the remaining columns moves to the start of the next row;
    /// a word wider than the page is still placed whole and runs past the nominal width.
    pub fn append_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.col < self.lmargin {
            self.col = self.lmargin;
        }
        for word in text.split_whitespace() {
            if self.space && self.col != self.lmargin {
                self.col += 1;
            }
            let len = word.chars().count();
            if len > self.width.saturating_sub(self.col) {
                self.row += 1;
                self.col = self.lmargin;
            }
            for ch in word.chars() {
                self.set_cell(self.col, self.row, ch);
                self.col += 1;
            }
            self.space = true;
        }
    }

    fn set_cell(&mut self, col: usize, row: usize, ch: char) {
        let index = row * self.width + col;
        while index >= self.cells.len() {
            let grown = self.cells.len() + GROW_CELLS;
            self.cells.resize(grown, Cell::default());
        }
        self.cells[index] = Cell {
            ch,
            attr: self.attr,
        };
    }

    /// Cell at (col, row), if it lies inside the allocated grid.
    pub fn cell(&self, col: usize, row: usize) -> Option<&Cell> {
        if col >= self.width {
            return None;
        }
        self.cells.get(row * self.width + col)
    }

    /// Text of one row with unset cells as spaces and trailing spaces removed.
    pub fn row_text(&self, row: usize) -> String {
        let start = row * self.width;
        if start >= self.cells.len() {
            return String::new();
        }
        let end = (start + self.width).min(self.cells.len());
        let line: String = self.cells[start..end]
            .iter()
            .map(|c| if c.ch == '\0' { ' ' } else { c.ch })
            .collect();
        line.trim_end().to_string()
    }

    /// Whole grid as text, one line per row, trailing empty rows dropped.
    pub fn render(&self) -> String {
        let rows = self.cells.len().div_ceil(self.width);
        let mut lines: Vec<String> = (0..rows).map(|r| self.row_text(r)).collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }
}
