use std::borrow::Cow;

use serde_json::Value;

/// XML-escape `&`, `<`, `>`, `"` and `'`.
pub fn xml_escape(text: &str) -> String {
	if !text.contains(['&', '<', '>', '"', '\'']) {
		return text.to_string();
	}

	let mut escaped = String::with_capacity(text.len() + 16);
	for ch in text.chars() {
		match ch {
			'&' => escaped.push_str("&amp;"),
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			'"' => escaped.push_str("&quot;"),
			'\'' => escaped.push_str("&#39;"),
			_ => escaped.push(ch),
		}
	}

	escaped
}

/// Escape literal template text for embedding in generated code: `\` and `'`
/// are backslash-escaped and every line break (`\r\n`, `\n`, `\r`) becomes the
/// two characters `\n`.
pub fn escape_literal(text: &str) -> String {
	let mut escaped = String::with_capacity(text.len() + 8);
	let mut chars = text.chars().peekable();

	while let Some(ch) = chars.next() {
		match ch {
			'\\' => escaped.push_str("\\\\"),
			'\'' => escaped.push_str("\\'"),
			'\r' => {
				if chars.peek() == Some(&'\n') {
					chars.next();
				}
				escaped.push_str("\\n");
			}
			'\n' => escaped.push_str("\\n"),
			_ => escaped.push(ch),
		}
	}

	escaped
}

/// Reverse [`escape_literal`]. Line breaks come back as `\n`.
pub fn unescape_literal(text: &str) -> Cow<'_, str> {
	if !text.contains('\\') {
		return Cow::Borrowed(text);
	}

	let mut unescaped = String::with_capacity(text.len());
	let mut chars = text.chars();

	while let Some(ch) = chars.next() {
		if ch != '\\' {
			unescaped.push(ch);
			continue;
		}

		match chars.next() {
			Some('n') => unescaped.push('\n'),
			Some(other) => unescaped.push(other),
			None => unescaped.push('\\'),
		}
	}

	Cow::Owned(unescaped)
}

/// The text written to the output for a value. Strings are written as-is,
/// `null` is written as nothing, whole floats drop their fraction, arrays are
/// comma-joined and objects are written as JSON.
pub fn display_value(value: &Value) -> String {
	match value {
		Value::Null => String::new(),
		Value::Bool(flag) => flag.to_string(),
		Value::Number(number) => {
			if let Some(integer) = number.as_i64() {
				integer.to_string()
			} else if let Some(integer) = number.as_u64() {
				integer.to_string()
			} else {
				display_float(number.as_f64().unwrap_or(f64::NAN))
			}
		}
		Value::String(text) => text.clone(),
		Value::Array(items) => {
			items
				.iter()
				.map(display_value)
				.collect::<Vec<_>>()
				.join(",")
		}
		Value::Object(_) => value.to_string(),
	}
}

pub(crate) fn display_float(number: f64) -> String {
	let magnitude = number.abs();

	if number.is_finite() && (magnitude >= 1e21 || (magnitude > 0.0 && magnitude < 1e-6)) {
		let formatted = format!("{number:e}");
		return match formatted.split_once('e') {
			Some((mantissa, exponent)) if !exponent.starts_with('-') => format!("{mantissa}e+{exponent}"),
			_ => formatted,
		};
	}

	if number.is_finite() && number.fract() == 0.0 {
		format!("{:.0}", number + 0.0)
	} else {
		number.to_string()
	}
}
