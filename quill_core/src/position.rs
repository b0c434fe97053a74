use serde::Deserialize;
use serde::Serialize;

/// A location inside template source text.
///
/// `line` and `column` are 1-based and count characters, `offset` is the
/// 0-based byte offset into the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
	pub line: usize,
	pub column: usize,
	pub offset: usize,
}

impl Point {
	pub fn new(line: usize, column: usize, offset: usize) -> Self {
		Self {
			line,
			column,
			offset,
		}
	}

	/// Locate a byte offset inside `source`. Offsets past the end are clamped
	/// and offsets inside a multi-byte character snap back to its start.
	pub fn locate(source: &str, offset: usize) -> Self {
		let mut offset = offset.min(source.len());
		while !source.is_char_boundary(offset) {
			offset -= 1;
		}

		let mut point = Self::default();
		point.advance_str(&source[..offset]);
		point
	}

	/// Move the point forward over the given text.
	pub fn advance_str(&mut self, text: &str) {
		for ch in text.chars() {
			self.advance_char(ch);
		}
	}

	pub fn advance_char(&mut self, ch: char) {
		if ch == '\n' {
			self.line += 1;
			self.column = 1;
		} else {
			self.column += 1;
		}

		self.offset += ch.len_utf8();
	}
}

impl Default for Point {
	fn default() -> Self {
		Self::new(1, 1, 0)
	}
}

/// Return the text of the 1-based `line` in `source`, without its line
/// terminator.
pub fn line_text(source: &str, line: usize) -> &str {
	source
		.split('\n')
		.nth(line.saturating_sub(1))
		.map_or("", |text| text.strip_suffix('\r').unwrap_or(text))
}

/// Count the 1-based line number for a byte offset.
pub fn line_number(source: &str, offset: usize) -> usize {
	Point::locate(source, offset).line
}
