use serde::Deserialize;
use serde::Serialize;

/// The kind of a node in the template AST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum TagKind {
	/// Verbatim text between tags.
	Literal,
	/// An output tag whose value is escaped before it is written, e.g.
	/// `{{ it.name }}` or `{%= it.name %}`.
	Interpolate,
	/// An output tag whose value is written without escaping, e.g.
	/// `{%~ it.html %}`.
	RawInterpolate,
	/// A logic tag whose content is handed to the back end, e.g.
	/// `{% if (it.ok) { %}`.
	Execute,
}

impl std::fmt::Display for TagKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Literal => write!(f, "literal"),
			Self::Interpolate => write!(f, "interpolate"),
			Self::RawInterpolate => write!(f, "raw"),
			Self::Execute => write!(f, "execute"),
		}
	}
}

/// A single node of the template AST. Insertion order is rendering order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AstNode {
	/// Literal text, already escaped for embedding in generated code (see
	/// [`crate::escape_literal`]).
	Literal(String),
	Tag(TagNode),
}

impl AstNode {
	pub fn kind(&self) -> TagKind {
		match self {
			Self::Literal(_) => TagKind::Literal,
			Self::Tag(tag) => tag.kind,
		}
	}

	pub fn as_tag(&self) -> Option<&TagNode> {
		match self {
			Self::Literal(_) => None,
			Self::Tag(tag) => Some(tag),
		}
	}
}

/// A parsed output or execute tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagNode {
	pub kind: TagKind,
	/// For output tags this is the base expression with any filter chain
	/// removed. For execute tags it is the verbatim tag content.
	pub value: String,
	/// The filter chain of an output tag. Never `Some` with an empty list.
	pub filters: Option<Vec<FilterCall>>,
	/// Set on execute tags of the form `let name = expr | filter`.
	pub assignment: Option<AssignmentRecord>,
	/// 1-based line of the opening delimiter, only recorded in debug mode.
	pub line_no: Option<usize>,
}

impl TagNode {
	pub fn new(kind: TagKind, value: impl Into<String>) -> Self {
		Self {
			kind,
			value: value.into(),
			filters: None,
			assignment: None,
			line_no: None,
		}
	}

	/// Attach a filter chain, normalizing an empty chain to `None`.
	#[must_use]
	pub fn with_filters(mut self, filters: Vec<FilterCall>) -> Self {
		self.filters = if filters.is_empty() {
			None
		} else {
			Some(filters)
		};
		self
	}

	#[must_use]
	pub fn with_assignment(mut self, assignment: Option<AssignmentRecord>) -> Self {
		self.assignment = assignment;
		self
	}

	#[must_use]
	pub fn with_line_no(mut self, line_no: Option<usize>) -> Self {
		self.line_no = line_no;
		self
	}
}

/// A named filter applied to a value, e.g. `join(' - ')`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCall {
	pub name: String,
	pub args: Vec<FilterArg>,
}

impl FilterCall {
	pub fn new(name: impl Into<String>, args: Vec<FilterArg>) -> Self {
		Self {
			name: name.into(),
			args,
		}
	}
}

/// A literal argument passed to a filter.
///
/// ```text
/// {{ it.items | join(' - ') | pad(2, true, null, other) }}
/// ```
///
/// - **String**: single or double quoted text, e.g. `' - '`
/// - **Number**: a signed decimal, e.g. `2` or `-0.5`
/// - **Boolean**: `true` or `false`
/// - **Null** / **Undefined**: the `null` and `undefined` keywords
/// - **Raw**: anything else, kept as source text for the back end to
///   evaluate, e.g. `other`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum FilterArg {
	String(String),
	Number(FloatLiteral),
	Boolean(bool),
	Null,
	Undefined,
	Raw(String),
}

/// A float wrapper compared with an approximate equality so that
/// [`FilterArg`] can derive `PartialEq`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FloatLiteral(pub f64);

impl PartialEq for FloatLiteral {
	fn eq(&self, other: &Self) -> bool {
		float_cmp::approx_eq!(f64, self.0, other.0)
	}
}

impl std::fmt::Display for FloatLiteral {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// The structured form of `let name = expr | filter ...` inside an execute
/// tag. Only produced when the expression carries at least one filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
	pub decl_keyword: DeclKeyword,
	pub var_name: String,
	/// The expression before the first pipe.
	pub value_expr: String,
	/// Never empty.
	pub filters: Vec<FilterCall>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclKeyword {
	Let,
	Const,
	Var,
}

impl DeclKeyword {
	pub fn from_keyword(keyword: &str) -> Option<Self> {
		match keyword {
			"let" => Some(Self::Let),
			"const" => Some(Self::Const),
			"var" => Some(Self::Var),
			_ => None,
		}
	}
}

impl std::fmt::Display for DeclKeyword {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Let => write!(f, "let"),
			Self::Const => write!(f, "const"),
			Self::Var => write!(f, "var"),
		}
	}
}
