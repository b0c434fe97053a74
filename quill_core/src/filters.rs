use std::collections::HashMap;
use std::sync::Arc;

use derive_more::Deref;
use serde_json::Value;

use crate::FilterArg;
use crate::FilterCall;
use crate::QuillError;
use crate::QuillResult;
use crate::escape::display_value;

/// A filter receives the current value followed by the call's arguments.
pub type FilterFn = Arc<dyn Fn(Value, &[Value]) -> QuillResult<Value> + Send + Sync>;

/// Name-keyed filter functions consulted at render time.
#[derive(Clone, Default, Deref)]
pub struct FilterRegistry {
	#[deref]
	filters: HashMap<String, FilterFn>,
}

impl std::fmt::Debug for FilterRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut names: Vec<_> = self.filters.keys().collect();
		names.sort();
		f.debug_struct("FilterRegistry")
			.field("filters", &names)
			.finish()
	}
}

impl FilterRegistry {
	/// A registry with no filters.
	pub fn new() -> Self {
		Self::default()
	}

	/// A registry holding the built-in filters: `upper`, `lower`,
	/// `capitalize`, `trim`, `round`, `abs`, `length`, `join`, `default` and
	/// `json`.
	pub fn with_builtins() -> Self {
		let mut registry = Self::new();

		registry.add("upper", |value, _| {
			Ok(Value::String(display_value(&value).to_uppercase()))
		});
		registry.add("lower", |value, _| {
			Ok(Value::String(display_value(&value).to_lowercase()))
		});
		registry.add("capitalize", |value, _| {
			Ok(Value::String(capitalize(&display_value(&value))))
		});
		registry.add("trim", |value, _| {
			Ok(Value::String(display_value(&value).trim().to_string()))
		});
		registry.add("round", |value, args| {
			let decimals = args.first().map_or(0.0, to_number);
			let factor = 10f64.powf(decimals);
			let rounded = js_round(to_number(&value) * factor) / factor;
			Ok(number_value(rounded))
		});
		registry.add("abs", |value, _| Ok(number_value(to_number(&value).abs())));
		registry.add("length", |value, _| {
			let length = match &value {
				Value::String(text) => text.chars().count(),
				Value::Array(items) => items.len(),
				Value::Object(map) => map.len(),
				_ => 0,
			};
			Ok(Value::from(length))
		});
		registry.add("join", |value, args| {
			let separator = args
				.first()
				.filter(|arg| !arg.is_null())
				.map_or_else(|| ",".to_string(), display_value);

			let joined = match &value {
				Value::Array(items) => {
					items
						.iter()
						.map(display_value)
						.collect::<Vec<_>>()
						.join(&separator)
				}
				other => display_value(other),
			};
			Ok(Value::String(joined))
		});
		registry.add("default", |value, args| {
			let is_empty = match &value {
				Value::Null => true,
				Value::String(text) => text.is_empty(),
				_ => false,
			};

			if is_empty {
				Ok(args.first().cloned().unwrap_or(Value::Null))
			} else {
				Ok(value)
			}
		});
		registry.add("json", |value, _| Ok(Value::String(value.to_string())));

		registry
	}

	/// Register a filter, replacing any existing filter with the same name.
	pub fn add(
		&mut self,
		name: impl Into<String>,
		filter: impl Fn(Value, &[Value]) -> QuillResult<Value> + Send + Sync + 'static,
	) {
		let name = name.into();
		tracing::debug!(filter = %name, "registered filter");
		self.filters.insert(name, Arc::new(filter));
	}

	/// Remove a filter. Returns whether it was registered.
	pub fn remove(&mut self, name: &str) -> bool {
		self.filters.remove(name).is_some()
	}

	pub fn has(&self, name: &str) -> bool {
		self.filters.contains_key(name)
	}

	/// Apply a filter chain left to right. Each filter receives the previous
	/// filter's output followed by its resolved arguments.
	///
	/// `resolve_arg` turns each [`FilterArg`] into a value, evaluating raw
	/// arguments as needed. An unknown filter name fails before any of its
	/// arguments are resolved.
	pub fn apply(
		&self,
		value: Value,
		chain: &[FilterCall],
		mut resolve_arg: impl FnMut(&FilterArg) -> QuillResult<Value>,
	) -> QuillResult<Value> {
		chain.iter().try_fold(value, |current, call| {
			let filter = self
				.filters
				.get(&call.name)
				.ok_or_else(|| QuillError::FilterNotFound(call.name.clone()))?;

			let args = call
				.args
				.iter()
				.map(&mut resolve_arg)
				.collect::<QuillResult<Vec<_>>>()?;

			filter(current, &args)
		})
	}
}

/// The value of a literal filter argument. `None` for raw arguments, which
/// must be evaluated.
pub fn literal_value(arg: &FilterArg) -> Option<Value> {
	match arg {
		FilterArg::String(text) => Some(Value::String(text.clone())),
		FilterArg::Number(number) => Some(number_value(number.0)),
		FilterArg::Boolean(flag) => Some(Value::Bool(*flag)),
		FilterArg::Null | FilterArg::Undefined => Some(Value::Null),
		FilterArg::Raw(_) => None,
	}
}

/// Convert a float into a JSON value, using an integer when it has no
/// fraction.
pub fn number_value(number: f64) -> Value {
	if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992.0 {
		return Value::from(number as i64);
	}

	serde_json::Number::from_f64(number).map_or(Value::Null, Value::Number)
}

/// Numeric coercion of a value: numeric strings parse, booleans are 0 or 1,
/// `null` is 0 and everything else is NaN.
pub fn to_number(value: &Value) -> f64 {
	match value {
		Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
		Value::String(text) => {
			let text = text.trim();
			if text.is_empty() {
				0.0
			} else {
				text.parse().unwrap_or(f64::NAN)
			}
		}
		Value::Bool(flag) => f64::from(u8::from(*flag)),
		Value::Null => 0.0,
		Value::Array(_) | Value::Object(_) => f64::NAN,
	}
}

/// Round half towards positive infinity.
fn js_round(number: f64) -> f64 {
	(number + 0.5).floor()
}

fn capitalize(text: &str) -> String {
	let mut chars = text.chars();
	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
		None => String::new(),
	}
}
