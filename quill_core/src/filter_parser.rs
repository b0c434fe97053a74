use snailquote::unescape;

use crate::AssignmentRecord;
use crate::DeclKeyword;
use crate::FilterArg;
use crate::FilterCall;
use crate::FloatLiteral;

/// Split `expr | name | name(args)` into the base expression and its filter
/// chain.
///
/// Segments after the first pipe that are not shaped like `name` or
/// `name(args)` are dropped. This never fails.
pub fn parse_filters(content: &str) -> (String, Vec<FilterCall>) {
	let mut segments = content.split('|');
	let value = segments.next().unwrap_or_default().trim().to_string();
	let filters = segments.filter_map(parse_filter_call).collect();

	(value, filters)
}

/// Detect `let|const|var name = expr | filter ...` inside execute-tag content.
///
/// Returns `None` when the content is not an assignment or when the assigned
/// expression has no filters, so the caller leaves the content untouched.
pub fn parse_assignment(content: &str) -> Option<AssignmentRecord> {
	let (decl_keyword, var_name, expression) = split_declaration(content)?;
	if expression.contains(['\n', '\r']) {
		return None;
	}

	let (value_expr, filters) = parse_filters(expression);
	if filters.is_empty() {
		return None;
	}

	Some(AssignmentRecord {
		decl_keyword,
		var_name: var_name.to_string(),
		value_expr,
		filters,
	})
}

/// Split `let|const|var name = expr` into its keyword, name and non-empty
/// expression.
pub(crate) fn split_declaration(content: &str) -> Option<(DeclKeyword, &str, &str)> {
	let rest = content.trim_start();

	let keyword_end = rest
		.find(|ch: char| !ch.is_ascii_alphabetic())
		.unwrap_or(rest.len());
	let decl_keyword = DeclKeyword::from_keyword(&rest[..keyword_end])?;
	let rest = &rest[keyword_end..];

	// At least one whitespace character must separate the keyword and name.
	let after_keyword = rest.trim_start();
	if after_keyword.len() == rest.len() {
		return None;
	}

	let name_end = after_keyword
		.find(|ch: char| !is_word_char(ch))
		.unwrap_or(after_keyword.len());
	if name_end == 0 {
		return None;
	}
	let var_name = &after_keyword[..name_end];

	let expression = after_keyword[name_end..]
		.trim_start()
		.strip_prefix('=')?
		.trim();
	if expression.is_empty() || expression.starts_with('=') {
		return None;
	}

	Some((decl_keyword, var_name, expression))
}

/// Parse one pipe segment into a filter call.
fn parse_filter_call(segment: &str) -> Option<FilterCall> {
	let segment = segment.trim();
	let name_end = segment
		.find(|ch: char| !is_word_char(ch))
		.unwrap_or(segment.len());
	if name_end == 0 {
		return None;
	}

	let (name, rest) = segment.split_at(name_end);
	let args = if rest.is_empty() {
		Vec::new()
	} else {
		let arguments = rest.strip_prefix('(')?.strip_suffix(')')?;
		parse_filter_args(arguments)
	};

	Some(FilterCall::new(name, args))
}

/// Split a filter argument list on commas and coerce each entry.
fn parse_filter_args(arguments: &str) -> Vec<FilterArg> {
	if arguments.is_empty() {
		return Vec::new();
	}

	arguments.split(',').map(parse_filter_arg).collect()
}

/// Coerce one argument: quoted string, then number, then keyword literal,
/// otherwise raw source text.
pub(crate) fn parse_filter_arg(argument: &str) -> FilterArg {
	let argument = argument.trim();

	if let Some(inner) = unquote(argument) {
		let value = if inner.contains('\\') {
			unescape(inner).unwrap_or_else(|_| inner.to_string())
		} else {
			inner.to_string()
		};
		return FilterArg::String(value);
	}

	if is_decimal(argument) {
		if let Ok(number) = argument.parse::<f64>() {
			return FilterArg::Number(FloatLiteral(number));
		}
	}

	match argument {
		"true" => FilterArg::Boolean(true),
		"false" => FilterArg::Boolean(false),
		"null" => FilterArg::Null,
		"undefined" => FilterArg::Undefined,
		_ => FilterArg::Raw(argument.to_string()),
	}
}

/// Strip matching single or double quotes from both ends.
fn unquote(argument: &str) -> Option<&str> {
	for quote in ['"', '\''] {
		if argument.len() >= 2 && argument.starts_with(quote) && argument.ends_with(quote) {
			return Some(&argument[1..argument.len() - 1]);
		}
	}

	None
}

/// Matches `-?\d+(\.\d+)?`.
fn is_decimal(text: &str) -> bool {
	let digits = text.strip_prefix('-').unwrap_or(text);
	let (whole, fraction) = match digits.split_once('.') {
		Some((whole, fraction)) => (whole, Some(fraction)),
		None => (digits, None),
	};

	let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|byte| byte.is_ascii_digit());

	all_digits(whole) && fraction.is_none_or(all_digits)
}

pub(crate) fn is_word_char(ch: char) -> bool {
	ch.is_ascii_alphanumeric() || ch == '_'
}
