use std::collections::HashMap;

use crate::Artifact;
use crate::QuillError;
use crate::QuillResult;

/// The prefix accepted on either side of a template name lookup.
pub const ALIAS_PREFIX: char = '@';

/// Compiled artifacts keyed by template name.
///
/// Entries are only added by [`ArtifactCache::define`] and never evicted.
#[derive(Debug, Clone, Default)]
pub struct ArtifactCache {
	artifacts: HashMap<String, Artifact>,
}

impl ArtifactCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Store an artifact, replacing any existing entry with the same name.
	pub fn define(&mut self, name: impl Into<String>, artifact: Artifact) {
		let name = name.into();
		tracing::debug!(template = %name, "defined template");
		self.artifacts.insert(name, artifact);
	}

	/// Find an artifact by name. The exact name is tried first, then the name
	/// with [`ALIAS_PREFIX`] added, or removed when it already starts with it.
	pub fn lookup(&self, name: &str) -> QuillResult<&Artifact> {
		if let Some(artifact) = self.artifacts.get(name) {
			return Ok(artifact);
		}

		let alias = match name.strip_prefix(ALIAS_PREFIX) {
			Some(stripped) => stripped.to_string(),
			None => format!("{ALIAS_PREFIX}{name}"),
		};

		self.artifacts
			.get(&alias)
			.inspect(|_| tracing::trace!(template = %name, %alias, "resolved template alias"))
			.ok_or_else(|| QuillError::NameResolution(name.to_string()))
	}

	pub fn contains(&self, name: &str) -> bool {
		self.lookup(name).is_ok()
	}

	pub fn remove(&mut self, name: &str) -> Option<Artifact> {
		self.artifacts.remove(name)
	}

	/// Defined names, sorted.
	pub fn names(&self) -> Vec<&str> {
		let mut names: Vec<_> = self.artifacts.keys().map(String::as_str).collect();
		names.sort_unstable();
		names
	}

	pub fn len(&self) -> usize {
		self.artifacts.len()
	}

	pub fn is_empty(&self) -> bool {
		self.artifacts.is_empty()
	}
}
