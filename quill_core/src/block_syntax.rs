//! Rewrites block-style statements in execute tags into the brace form
//! understood by the default back end:
//!
//! ```text
//! {% for key, value in items %}  →  {% for (let [key, value] of Object.entries(it.items)) { %}
//! {% for item in it.items %}     →  {% for (let item of it.items) { %}
//! {% endfor %}                   →  {% } %}
//! {% if cond %}                  →  {% if (cond) { %}
//! {% elsif cond %}               →  {% } else if (cond) { %}
//! {% else %}                     →  {% } else { %}
//! {% endif %}                    →  {% } %}
//! {% set name = expr %}          →  {% let name = expr %}
//! ```
//!
//! The rewrite runs on tokenized tags, so positions reported by the
//! tokenizer always point into the template as written.

use crate::AstNode;
use crate::TagKind;
use crate::filter_parser::is_word_char;
use crate::filter_parser::parse_assignment;

/// Rewrite every block statement among the execute tags of `nodes`.
/// `var_name` is prepended to bare identifiers used as loop sources.
pub fn rewrite_block_tags(nodes: &mut [AstNode], var_name: &str) {
	for node in nodes {
		let AstNode::Tag(tag) = node else {
			continue;
		};

		if tag.kind != TagKind::Execute || tag.assignment.is_some() {
			continue;
		}

		if let Some(statement) = rewrite_statement(&tag.value, var_name) {
			tag.assignment = parse_assignment(&statement);
			tag.value = statement;
		}
	}
}

/// Rewrite the content of a single execute tag, or `None` when it is not a
/// block statement.
fn rewrite_statement(inner: &str, var_name: &str) -> Option<String> {
	let statement = inner.trim();

	match statement {
		"endfor" | "endif" => return Some("}".to_string()),
		"else" => return Some("} else {".to_string()),
		_ => {}
	}

	if let Some(rest) = strip_keyword(statement, "for") {
		return rewrite_for(rest, var_name);
	}

	if let Some(condition) = strip_keyword(statement, "if") {
		if condition.ends_with('{') {
			return None;
		}
		return Some(format!("if ({condition}) {{"));
	}

	if let Some(condition) = strip_keyword(statement, "elsif") {
		if condition.ends_with('{') {
			return None;
		}
		return Some(format!("}} else if ({condition}) {{"));
	}

	if let Some(assignment) = strip_keyword(statement, "set") {
		let (name, value) = assignment.split_once('=')?;
		let name = name.trim();
		let value = value.trim();
		if !is_identifier(name) || value.is_empty() {
			return None;
		}
		return Some(format!("let {name} = {value}"));
	}

	None
}

/// `key in expr` or `key, value in expr`.
fn rewrite_for(rest: &str, var_name: &str) -> Option<String> {
	let (bindings, expression) = split_in(rest)?;
	let expression = expression.trim();
	if expression.is_empty() {
		return None;
	}

	let source = if needs_data_prefix(expression) {
		format!("{var_name}.{expression}")
	} else {
		expression.to_string()
	};

	match bindings.split_once(',') {
		Some((key, value)) => {
			let key = key.trim();
			let value = value.trim();
			(is_identifier(key) && is_identifier(value))
				.then(|| format!("for (let [{key}, {value}] of Object.entries({source})) {{"))
		}
		None => {
			let item = bindings.trim();
			is_identifier(item).then(|| format!("for (let {item} of {source}) {{"))
		}
	}
}

/// Split on the first standalone ` in ` keyword.
fn split_in(text: &str) -> Option<(&str, &str)> {
	let mut search = 0;

	while let Some(found) = text[search..].find("in") {
		let index = search + found;
		let before = text[..index].chars().next_back();
		let after = text[index + 2..].chars().next();

		if before.is_some_and(char::is_whitespace) && after.is_some_and(char::is_whitespace) {
			return Some((&text[..index], &text[index + 2..]));
		}

		search = index + 2;
	}

	None
}

/// Strip a leading keyword that is followed by whitespace.
fn strip_keyword<'a>(statement: &'a str, keyword: &str) -> Option<&'a str> {
	let rest = statement.strip_prefix(keyword)?;
	let trimmed = rest.trim_start();

	(trimmed.len() < rest.len()).then_some(trimmed)
}

/// Bare identifiers like `items` get the data prefix. Paths, calls and
/// operator expressions are left as written.
fn needs_data_prefix(expression: &str) -> bool {
	is_identifier(expression)
}

fn is_identifier(text: &str) -> bool {
	!text.is_empty() && text.chars().all(is_word_char)
}
