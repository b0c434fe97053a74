use std::fmt::Display;

use miette::Diagnostic;
use miette::SourceSpan;
use thiserror::Error;

use crate::position::Point;
use crate::position::line_text;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum QuillError {
	#[error(transparent)]
	#[diagnostic(code(quill::io_error))]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	#[diagnostic(transparent)]
	Parse(#[from] ParseError),

	#[error("bad template syntax in `{statement}`: {reason}")]
	#[diagnostic(
		code(quill::template_syntax),
		help(
			"execute tags support `let`/`const`/`var` assignments, `if`/`else`, `for` loops, \
			 `layout(...)` and block comments"
		)
	)]
	TemplateSyntax { statement: String, reason: String },

	#[error("filter `{0}` not found")]
	#[diagnostic(
		code(quill::filter_not_found),
		help("register the filter with `Engine::add_filter` before rendering")
	)]
	FilterNotFound(String),

	#[error("failed to get template `{0}`")]
	#[diagnostic(
		code(quill::name_resolution),
		help("load the template with `Engine::load_template` or `Engine::define` first")
	)]
	NameResolution(String),

	#[error("{message}")]
	#[diagnostic(code(quill::runtime))]
	Runtime { name: String, message: String },

	#[error("template `{0}` is asynchronous and cannot be rendered synchronously")]
	#[diagnostic(code(quill::async_template), help("use `Engine::render_async` instead"))]
	AsyncTemplate(String),

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(quill::config_parse),
		help("check that the config is valid TOML with an optional [delimiters] section")
	)]
	ConfigParse(String),
}

impl QuillError {
	/// Build a runtime error. When a line number is known the message is
	/// prefixed with a window of the surrounding source lines.
	pub fn runtime(
		name: impl Into<String>,
		message: impl Display,
		source: &str,
		line: Option<usize>,
	) -> Self {
		let message = match line {
			Some(line) => format!("{}\n\n{message}", source_window(source, line)),
			None => message.to_string(),
		};

		Self::Runtime {
			name: name.into(),
			message,
		}
	}

	/// The error category. Runtime errors keep the category of the failure
	/// they wrap.
	pub fn name(&self) -> &str {
		match self {
			Self::Io(_) => "IoError",
			Self::Parse(_) => "ParseError",
			Self::TemplateSyntax { .. } => "TemplateSyntaxError",
			Self::FilterNotFound(_) => "FilterNotFoundError",
			Self::NameResolution(_) => "NameResolutionError",
			Self::Runtime { name, .. } => name,
			Self::AsyncTemplate(_) => "AsyncTemplateError",
			Self::ConfigParse(_) => "ConfigParseError",
		}
	}
}

/// Render up to three lines either side of `line`, marking it with ` >> `.
fn source_window(source: &str, line: usize) -> String {
	let lines: Vec<&str> = source.split('\n').collect();
	let start = line.saturating_sub(3);
	let end = lines.len().min(line + 3);

	let context = lines
		.get(start..end)
		.unwrap_or_default()
		.iter()
		.enumerate()
		.map(|(index, text)| {
			let current = start + index + 1;
			let marker = if current == line { " >> " } else { "    " };
			format!("{marker}{current}| {text}")
		})
		.collect::<Vec<_>>()
		.join("\n");

	format!("line {line}\n{context}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
	/// A tag was opened and the input ended before its close delimiter.
	UnclosedTag,
	/// A quoted string or template literal inside a tag was never closed.
	UnclosedString,
	/// A comment tag or a block comment inside a tag was never closed.
	UnclosedComment,
}

impl Display for ParseErrorKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::UnclosedTag => write!(f, "unclosed tag"),
			Self::UnclosedString => write!(f, "unclosed string"),
			Self::UnclosedComment => write!(f, "unclosed comment"),
		}
	}
}

/// A tokenizer failure. Always locatable: it keeps the full source together
/// with the byte offset and the derived line and column.
#[derive(Debug, Clone, Diagnostic, Error)]
#[error(
	"{kind} at line {line} col {column}:\n\n  {snippet}\n  {caret}^",
	caret = " ".repeat(.column.saturating_sub(1))
)]
#[diagnostic(code(quill::parse))]
pub struct ParseError {
	pub kind: ParseErrorKind,
	#[source_code]
	pub source_code: String,
	#[label("starts here")]
	pub span: SourceSpan,
	pub offset: usize,
	pub line: usize,
	pub column: usize,
	snippet: String,
}

impl ParseError {
	pub fn new(kind: ParseErrorKind, source: &str, offset: usize) -> Self {
		let point = Point::locate(source, offset);

		Self {
			kind,
			source_code: source.to_string(),
			span: SourceSpan::from((point.offset, 0)),
			offset: point.offset,
			line: point.line,
			column: point.column,
			snippet: line_text(source, point.line).to_string(),
		}
	}
}

pub type QuillResult<T> = Result<T, QuillError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
