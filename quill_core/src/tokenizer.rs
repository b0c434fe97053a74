use crate::AstNode;
use crate::EngineConfig;
use crate::ParseError;
use crate::ParseErrorKind;
use crate::QuillResult;
use crate::TagKind;
use crate::TagNode;
use crate::escape::escape_literal;
use crate::filter_parser::parse_assignment;
use crate::filter_parser::parse_filters;
use crate::position::line_number;

/// Characters that mark a whitespace-trim immediately inside a delimiter.
const TRIM_MARKERS: [char; 2] = ['-', '_'];

/// Scan `source` into literal and tag nodes.
///
/// Fails with a [`ParseError`] when a tag, a string inside a tag or a comment
/// is left unclosed.
pub fn tokenize(source: &str, config: &EngineConfig) -> QuillResult<Vec<AstNode>> {
	let mut walker = TagWalker::new(source, config);
	walker.process()?;

	tracing::trace!(nodes = walker.nodes.len(), "tokenized template");
	Ok(walker.nodes)
}

/// How the edge of a literal next to a tag should be trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeTrim {
	/// The very start or end of the template.
	Never,
	/// No trim marker, follow `auto_trim`.
	Default,
	/// A `-` or `_` marker was present.
	Marker,
}

impl EdgeTrim {
	fn from_marker(marker: bool) -> Self {
		if marker { Self::Marker } else { Self::Default }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenKind {
	Execute,
	Output,
	Comment,
}

/// A matched open delimiter.
#[derive(Debug)]
struct OpenTag {
	/// Byte offset of the open delimiter.
	start: usize,
	/// Byte offset where the tag content starts, after the marker, prefix and
	/// leading whitespace.
	content_start: usize,
	kind: OpenKind,
	/// The tag kind selected by the delimiter and prefix.
	tag_kind: TagKind,
	trim: EdgeTrim,
}

/// A matched close delimiter.
#[derive(Debug)]
struct CloseTag {
	/// Byte offset where the tag content ends.
	content_end: usize,
	/// Byte offset just past the close delimiter.
	end: usize,
	trim: EdgeTrim,
}

/// States of the scanner.
enum ScanState {
	/// Outside of any tag, looking for the next open delimiter.
	Scanning,
	/// After an open delimiter, looking for its close delimiter.
	InTag(OpenTag),
}

/// Walks the template source with an explicit cursor, building AST nodes.
struct TagWalker<'a> {
	source: &'a str,
	config: &'a EngineConfig,
	/// Byte offset of the first character not yet consumed.
	cursor: usize,
	/// Trim rule for the start of the next literal, set by the last close
	/// delimiter.
	trim_next_start: EdgeTrim,
	nodes: Vec<AstNode>,
}

impl<'a> TagWalker<'a> {
	fn new(source: &'a str, config: &'a EngineConfig) -> Self {
		Self {
			source,
			config,
			cursor: 0,
			trim_next_start: EdgeTrim::Never,
			nodes: vec![],
		}
	}

	fn process(&mut self) -> QuillResult<()> {
		let mut state = ScanState::Scanning;

		loop {
			state = match state {
				ScanState::Scanning => {
					let Some(open) = self.find_open() else {
						break;
					};

					let literal = &self.source[self.cursor..open.start];
					self.push_literal(literal, open.trim);

					if open.kind == OpenKind::Comment {
						self.skip_comment_tag(&open)?;
						ScanState::Scanning
					} else {
						ScanState::InTag(open)
					}
				}
				ScanState::InTag(open) => {
					let close = self.find_close(&open)?;
					self.push_tag(&open, &close);
					self.cursor = close.end;
					self.trim_next_start = close.trim;
					ScanState::Scanning
				}
			};
		}

		let trailing = &self.source[self.cursor..];
		self.push_literal(trailing, EdgeTrim::Never);
		self.cursor = self.source.len();

		Ok(())
	}

	fn should_trim(&self, edge: EdgeTrim) -> bool {
		match edge {
			EdgeTrim::Never => false,
			EdgeTrim::Default => self.config.auto_trim,
			EdgeTrim::Marker => true,
		}
	}

	/// Trim and escape a literal segment, then push it unless empty.
	fn push_literal(&mut self, text: &str, end_trim: EdgeTrim) {
		let mut text = text;
		if self.should_trim(self.trim_next_start) {
			text = text.trim_start();
		}
		if self.should_trim(end_trim) {
			text = text.trim_end();
		}

		if !text.is_empty() {
			self.nodes.push(AstNode::Literal(escape_literal(text)));
		}
	}

	/// Find the earliest open delimiter at or after the cursor. When two
	/// delimiters match at the same offset the longer one wins.
	fn find_open(&self) -> Option<OpenTag> {
		let delimiters = &self.config.delimiters;
		let candidates = [
			(OpenKind::Execute, delimiters.execute.open.as_str()),
			(OpenKind::Output, delimiters.output.open.as_str()),
			(OpenKind::Comment, delimiters.comment.open.as_str()),
		];

		let rest = &self.source[self.cursor..];
		let (kind, start, open_len) = candidates
			.iter()
			.filter(|(_, open)| !open.is_empty())
			.filter_map(|(kind, open)| rest.find(open).map(|index| (*kind, index, open.len())))
			.min_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)))?;

		let start = self.cursor + start;
		let mut position = start + open_len;

		if kind == OpenKind::Comment {
			return Some(OpenTag {
				start,
				content_start: position,
				kind,
				tag_kind: TagKind::Execute,
				trim: EdgeTrim::Default,
			});
		}

		let marker = self.source[position..].starts_with(TRIM_MARKERS);
		if marker {
			position += 1;
		}
		position = self.skip_whitespace(position);

		let mut tag_kind = TagKind::Interpolate;
		if kind == OpenKind::Execute {
			let prefixes = &self.config.prefixes;
			let rest = &self.source[position..];

			tag_kind = if !prefixes.interpolate.is_empty() && rest.starts_with(&prefixes.interpolate) {
				position += prefixes.interpolate.len();
				TagKind::Interpolate
			} else if !prefixes.raw.is_empty() && rest.starts_with(&prefixes.raw) {
				position += prefixes.raw.len();
				TagKind::RawInterpolate
			} else {
				TagKind::Execute
			};

			if tag_kind != TagKind::Execute {
				position = self.skip_whitespace(position);
			}
		}

		Some(OpenTag {
			start,
			content_start: position,
			kind,
			tag_kind,
			trim: EdgeTrim::from_marker(marker),
		})
	}

	fn skip_whitespace(&self, position: usize) -> usize {
		let rest = &self.source[position..];
		position + (rest.len() - rest.trim_start().len())
	}

	/// Comment tags are closed by a plain search for the close delimiter.
	fn skip_comment_tag(&mut self, open: &OpenTag) -> QuillResult<()> {
		let close = &self.config.delimiters.comment.close;
		let Some(index) = self.source[open.content_start..].find(close.as_str()) else {
			return Err(ParseError::new(ParseErrorKind::UnclosedComment, self.source, open.start).into());
		};

		self.cursor = open.content_start + index + close.len();
		self.trim_next_start = EdgeTrim::Default;

		Ok(())
	}

	/// Scan forward from the tag content for its close delimiter, stepping
	/// over quoted strings, template literals and block comments so that a
	/// close delimiter inside them does not end the tag.
	fn find_close(&self, open: &OpenTag) -> QuillResult<CloseTag> {
		let close = match open.kind {
			OpenKind::Output => self.config.delimiters.output.close.as_str(),
			OpenKind::Execute | OpenKind::Comment => self.config.delimiters.execute.close.as_str(),
		};
		let source = self.source;
		let mut index = open.content_start;

		while let Some(ch) = source[index..].chars().next() {
			let rest = &source[index..];

			match ch {
				'\'' | '"' | '`' => {
					index = skip_string(source, index).ok_or_else(|| {
						ParseError::new(ParseErrorKind::UnclosedString, source, index)
					})?;
				}
				'/' if rest.starts_with("/*") => {
					index = skip_block_comment(source, index).ok_or_else(|| {
						ParseError::new(ParseErrorKind::UnclosedComment, source, index)
					})?;
				}
				'-' | '_' if rest[1..].starts_with(close) => {
					return Ok(CloseTag {
						content_end: index,
						end: index + 1 + close.len(),
						trim: EdgeTrim::Marker,
					});
				}
				_ if rest.starts_with(close) => {
					return Ok(CloseTag {
						content_end: index,
						end: index + close.len(),
						trim: EdgeTrim::Default,
					});
				}
				_ => index += ch.len_utf8(),
			}
		}

		Err(ParseError::new(ParseErrorKind::UnclosedTag, source, open.start).into())
	}

	fn push_tag(&mut self, open: &OpenTag, close: &CloseTag) {
		let content = self.source[open.content_start..close.content_end].trim_end();

		let node = match open.tag_kind {
			TagKind::Interpolate | TagKind::RawInterpolate => {
				let (value, filters) = parse_filters(content);
				TagNode::new(open.tag_kind, value).with_filters(filters)
			}
			_ => TagNode::new(TagKind::Execute, content).with_assignment(parse_assignment(content)),
		};

		let line_no = self
			.config
			.debug
			.then(|| line_number(self.source, open.start));

		self.nodes.push(AstNode::Tag(node.with_line_no(line_no)));
	}
}

/// Skip a quoted string or template literal starting at `start`. Returns the
/// offset just past its closing quote, or `None` when it is never closed.
///
/// Single and double quoted strings may not contain a raw line break.
/// Template literals may span lines and contain `${ ... }` substitutions.
pub(crate) fn skip_string(source: &str, start: usize) -> Option<usize> {
	let quote = source[start..].chars().next()?;
	let mut chars = source[start + 1..].char_indices().peekable();

	while let Some((offset, ch)) = chars.next() {
		let index = start + 1 + offset;

		match ch {
			'\\' => {
				chars.next();
			}
			'\n' | '\r' if quote != '`' => return None,
			'$' if quote == '`' && source[index..].starts_with("${") => {
				let end = skip_substitution(source, index + 2)?;
				while chars.peek().is_some_and(|(offset, _)| start + 1 + offset < end) {
					chars.next();
				}
			}
			_ if ch == quote => return Some(index + ch.len_utf8()),
			_ => {}
		}
	}

	None
}

/// Skip the body of a `${ ... }` substitution starting just after `${`.
fn skip_substitution(source: &str, start: usize) -> Option<usize> {
	let mut depth = 1usize;
	let mut index = start;

	while let Some(ch) = source[index..].chars().next() {
		match ch {
			'\'' | '"' | '`' => {
				index = skip_string(source, index)?;
				continue;
			}
			'{' => depth += 1,
			'}' => {
				depth -= 1;
				if depth == 0 {
					return Some(index + 1);
				}
			}
			_ => {}
		}

		index += ch.len_utf8();
	}

	None
}

/// Skip a `/* ... */` comment starting at `start`.
pub(crate) fn skip_block_comment(source: &str, start: usize) -> Option<usize> {
	source[start + 2..]
		.find("*/")
		.map(|index| start + 2 + index + 2)
}
