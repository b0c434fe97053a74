use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::QuillError;
use crate::QuillResult;
use crate::escape::display_value;
use crate::escape::xml_escape;

/// Escapes the display form of an interpolated value.
pub type EscapeFunction = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Applied to every interpolation when `auto_filter` is enabled.
pub type FilterFunction = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// An open and close delimiter pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDelimiter {
	pub open: String,
	pub close: String,
}

impl TagDelimiter {
	pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
		Self {
			open: open.into(),
			close: close.into(),
		}
	}
}

/// The three tag delimiter pairs recognised by the tokenizer.
///
/// ```toml
/// [delimiters]
/// execute = { open = "{%", close = "%}" }
/// output = { open = "{{", close = "}}" }
/// comment = { open = "{#", close = "#}" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delimiters {
	/// Logic tags. A prefix right after the open delimiter turns them into
	/// output tags.
	pub execute: TagDelimiter,
	/// Output tags, always interpolated.
	pub output: TagDelimiter,
	/// Comment tags, dropped from the AST.
	pub comment: TagDelimiter,
}

impl Default for Delimiters {
	fn default() -> Self {
		Self {
			execute: TagDelimiter::new("{%", "%}"),
			output: TagDelimiter::new("{{", "}}"),
			comment: TagDelimiter::new("{#", "#}"),
		}
	}
}

/// Prefixes accepted after the execute open delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagPrefixes {
	/// `{%= value %}` escapes and writes the value.
	pub interpolate: String,
	/// `{%~ value %}` writes the value without escaping.
	pub raw: String,
}

impl Default for TagPrefixes {
	fn default() -> Self {
		Self {
			interpolate: "=".to_string(),
			raw: "~".to_string(),
		}
	}
}

/// Configuration for an [`crate::Engine`].
#[derive(Clone)]
pub struct EngineConfig {
	pub delimiters: Delimiters,
	pub prefixes: TagPrefixes,
	/// Escape interpolated values with `escape_function`. Defaults to `true`.
	pub auto_escape: bool,
	/// Pass every interpolation through `filter_function`. Defaults to
	/// `false`.
	pub auto_filter: bool,
	/// Trim whitespace around tags that carry no trim marker. Defaults to
	/// `false`.
	pub auto_trim: bool,
	/// Record line numbers on tags for richer runtime errors.
	pub debug: bool,
	/// Expose the top-level keys of the data as variables.
	pub use_with: bool,
	/// Name the data is available under inside templates. Defaults to `it`.
	pub var_name: String,
	/// Rewrite `{% if %}`/`{% for %}`/`{% set %}` blocks before tokenizing.
	pub block_syntax: bool,
	pub escape_function: EscapeFunction,
	pub filter_function: FilterFunction,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			delimiters: Delimiters::default(),
			prefixes: TagPrefixes::default(),
			auto_escape: true,
			auto_filter: false,
			auto_trim: false,
			debug: false,
			use_with: false,
			var_name: "it".to_string(),
			block_syntax: true,
			escape_function: Arc::new(xml_escape),
			filter_function: Arc::new(|value| Value::String(display_value(&value))),
		}
	}
}

impl std::fmt::Debug for EngineConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EngineConfig")
			.field("delimiters", &self.delimiters)
			.field("prefixes", &self.prefixes)
			.field("auto_escape", &self.auto_escape)
			.field("auto_filter", &self.auto_filter)
			.field("auto_trim", &self.auto_trim)
			.field("debug", &self.debug)
			.field("use_with", &self.use_with)
			.field("var_name", &self.var_name)
			.field("block_syntax", &self.block_syntax)
			.finish_non_exhaustive()
	}
}

impl EngineConfig {
	/// Parse the plain-data part of a configuration from TOML. Fields that are
	/// absent keep their defaults.
	pub fn from_toml_str(content: &str) -> QuillResult<Self> {
		let file: ConfigFile =
			toml::from_str(content).map_err(|e| QuillError::ConfigParse(e.to_string()))?;

		let mut config = Self::default();
		file.apply(&mut config);

		Ok(config)
	}

	/// Load a configuration file from disk.
	pub fn load(path: impl AsRef<Path>) -> QuillResult<Self> {
		let content = std::fs::read_to_string(path)?;
		Self::from_toml_str(&content)
	}

	#[must_use]
	pub fn with_escape_function(
		mut self,
		escape: impl Fn(&str) -> String + Send + Sync + 'static,
	) -> Self {
		self.escape_function = Arc::new(escape);
		self
	}

	#[must_use]
	pub fn with_filter_function(
		mut self,
		filter: impl Fn(Value) -> Value + Send + Sync + 'static,
	) -> Self {
		self.filter_function = Arc::new(filter);
		self
	}
}

/// The serialisable subset of [`EngineConfig`].
///
/// ```toml
/// auto_escape = false
/// auto_trim = true
/// var_name = "data"
///
/// [delimiters]
/// output = { open = "[[", close = "]]" }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
	#[serde(default)]
	pub delimiters: Option<Delimiters>,
	#[serde(default)]
	pub prefixes: Option<TagPrefixes>,
	#[serde(default)]
	pub auto_escape: Option<bool>,
	#[serde(default)]
	pub auto_filter: Option<bool>,
	#[serde(default)]
	pub auto_trim: Option<bool>,
	#[serde(default)]
	pub debug: Option<bool>,
	#[serde(default)]
	pub use_with: Option<bool>,
	#[serde(default)]
	pub var_name: Option<String>,
	#[serde(default)]
	pub block_syntax: Option<bool>,
}

impl ConfigFile {
	fn apply(self, config: &mut EngineConfig) {
		if let Some(delimiters) = self.delimiters {
			config.delimiters = delimiters;
		}
		if let Some(prefixes) = self.prefixes {
			config.prefixes = prefixes;
		}
		if let Some(var_name) = self.var_name {
			config.var_name = var_name;
		}

		config.auto_escape = self.auto_escape.unwrap_or(config.auto_escape);
		config.auto_filter = self.auto_filter.unwrap_or(config.auto_filter);
		config.auto_trim = self.auto_trim.unwrap_or(config.auto_trim);
		config.debug = self.debug.unwrap_or(config.debug);
		config.use_with = self.use_with.unwrap_or(config.use_with);
		config.block_syntax = self.block_syntax.unwrap_or(config.block_syntax);
	}
}
