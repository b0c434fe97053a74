use std::sync::Arc;

use serde_json::Value;

use crate::Artifact;
use crate::ArtifactCache;
use crate::AstNode;
use crate::Backend;
use crate::BoxFuture;
use crate::EngineConfig;
use crate::FilterFn;
use crate::FilterRegistry;
use crate::ProgramBackend;
use crate::QuillError;
use crate::QuillResult;
use crate::RenderOptions;
use crate::artifact::layout_data;
use crate::block_syntax::rewrite_block_tags;
use crate::tokenizer::tokenize;

/// Name reported for artifacts rendered without going through the cache.
const ANONYMOUS: &str = "<anonymous>";

/// A template engine instance: configuration, compiled templates and filters.
///
/// ```rust
/// use quill_core::Engine;
/// use quill_core::RenderOptions;
/// use serde_json::json;
///
/// let mut engine = Engine::new();
/// engine.load_template("greeting", "Hello {{ it.name | capitalize }}!")?;
///
/// let output = engine.render("@greeting", &json!({ "name": "ada" }), &mut RenderOptions::new())?;
/// assert_eq!(output, "Hello Ada!");
/// # Ok::<(), quill_core::QuillError>(())
/// ```
#[derive(Clone)]
pub struct Engine {
	config: EngineConfig,
	cache: ArtifactCache,
	filters: FilterRegistry,
	backend: Arc<dyn Backend>,
}

impl Default for Engine {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for Engine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Engine")
			.field("config", &self.config)
			.field("cache", &self.cache)
			.field("filters", &self.filters)
			.finish_non_exhaustive()
	}
}

impl Engine {
	/// An engine with the default configuration, the built-in filters and the
	/// [`ProgramBackend`].
	pub fn new() -> Self {
		Self::with_engine_config(EngineConfig::default())
	}

	pub fn with_engine_config(config: EngineConfig) -> Self {
		Self {
			config,
			cache: ArtifactCache::new(),
			filters: FilterRegistry::with_builtins(),
			backend: Arc::new(ProgramBackend::new()),
		}
	}

	/// Replace the back end used by [`Engine::compile`].
	#[must_use]
	pub fn with_backend(mut self, backend: impl Backend + 'static) -> Self {
		self.backend = Arc::new(backend);
		self
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	/// Update this engine's configuration in place. Templates that are
	/// already compiled keep the configuration they were compiled with.
	pub fn configure(&mut self, update: impl FnOnce(&mut EngineConfig)) -> &mut Self {
		update(&mut self.config);
		self
	}

	/// A copy of this engine with an updated configuration. The original is
	/// left unchanged.
	#[must_use]
	pub fn with_config(&self, update: impl FnOnce(&mut EngineConfig)) -> Self {
		let mut engine = self.clone();
		update(&mut engine.config);
		engine
	}

	/// Tokenize a template into its AST. Block-style statements are already
	/// rewritten when `block_syntax` is enabled.
	pub fn parse(&self, source: &str) -> QuillResult<Vec<AstNode>> {
		let mut ast = tokenize(source, &self.config)?;
		if self.config.block_syntax {
			rewrite_block_tags(&mut ast, &self.config.var_name);
		}

		Ok(ast)
	}

	/// Compile a template into an artifact without storing it.
	pub fn compile(&self, source: &str) -> QuillResult<Artifact> {
		let ast = self.parse(source)?;

		tracing::debug!(nodes = ast.len(), "compiled template");
		self.backend.compile(&ast, source, &self.config)
	}

	/// Compile a template and store it under `name`.
	pub fn load_template(&mut self, name: impl Into<String>, source: &str) -> QuillResult<&mut Self> {
		let artifact = self.compile(source)?;
		self.cache.define(name, artifact);
		Ok(self)
	}

	/// Store an artifact under `name`, replacing any previous entry.
	pub fn define(&mut self, name: impl Into<String>, artifact: Artifact) -> &mut Self {
		self.cache.define(name, artifact);
		self
	}

	pub fn templates(&self) -> &ArtifactCache {
		&self.cache
	}

	pub fn filters(&self) -> &FilterRegistry {
		&self.filters
	}

	/// Register a filter, replacing any existing filter with the same name.
	pub fn add_filter(
		&mut self,
		name: impl Into<String>,
		filter: impl Fn(Value, &[Value]) -> QuillResult<Value> + Send + Sync + 'static,
	) -> &mut Self {
		self.filters.add(name, filter);
		self
	}

	pub fn remove_filter(&mut self, name: &str) -> bool {
		let removed = self.filters.remove(name);
		tracing::debug!(filter = %name, removed, "removed filter");
		removed
	}

	pub fn has_filter(&self, name: &str) -> bool {
		self.filters.has(name)
	}

	pub fn get_filter(&self, name: &str) -> Option<&FilterFn> {
		self.filters.get(name)
	}

	/// Render a stored template. `name` may be given with or without the `@`
	/// prefix.
	pub fn render(&self, name: &str, data: &Value, options: &mut RenderOptions) -> QuillResult<String> {
		let artifact = self.cache.lookup(name)?;
		self.invoke(name, artifact, data, options)
	}

	/// Render an artifact that is not necessarily stored in the cache.
	pub fn render_artifact(
		&self,
		artifact: &Artifact,
		data: &Value,
		options: &mut RenderOptions,
	) -> QuillResult<String> {
		self.invoke(ANONYMOUS, artifact, data, options)
	}

	/// Compile and render a template in one step. Nothing is cached.
	pub fn render_string(
		&self,
		source: &str,
		data: &Value,
		options: &mut RenderOptions,
	) -> QuillResult<String> {
		let artifact = self.compile(source)?;
		self.render_artifact(&artifact, data, options)
	}

	fn invoke(
		&self,
		name: &str,
		artifact: &Artifact,
		data: &Value,
		options: &mut RenderOptions,
	) -> QuillResult<String> {
		let body = match artifact {
			Artifact::Sync(render) | Artifact::Dual { sync: render, .. } => render(self, data, options)?,
			Artifact::Async(_) => return Err(QuillError::AsyncTemplate(name.to_string())),
		};

		match options.take_layout() {
			Some(layout) => {
				tracing::debug!(template = %name, layout = %layout.name, "rendering layout");
				let data = layout_data(data, body, layout.data);

				options.descend()?;
				let output = self.render(&layout.name, &data, options);
				options.ascend();

				output
			}
			None => Ok(body),
		}
	}

	/// Render a stored template, awaiting asynchronous artifacts. Layouts are
	/// rendered through this method as well.
	pub fn render_async<'a>(
		&'a self,
		name: &'a str,
		data: &'a Value,
		options: &'a mut RenderOptions,
	) -> BoxFuture<'a, QuillResult<String>> {
		Box::pin(async move {
			let artifact = self.cache.lookup(name)?.clone();
			self.invoke_async(name, &artifact, data, options).await
		})
	}

	/// Compile and render a template in one step, awaiting any layout.
	pub async fn render_string_async(
		&self,
		source: &str,
		data: &Value,
		options: &mut RenderOptions,
	) -> QuillResult<String> {
		let artifact = self.compile(source)?;
		self.invoke_async(ANONYMOUS, &artifact, data, options).await
	}

	async fn invoke_async(
		&self,
		name: &str,
		artifact: &Artifact,
		data: &Value,
		options: &mut RenderOptions,
	) -> QuillResult<String> {
		let body = match artifact {
			Artifact::Sync(render) => render(self, data, options)?,
			Artifact::Async(render) | Artifact::Dual { async_render: render, .. } => {
				render(self, data, options).await?
			}
		};

		match options.take_layout() {
			Some(layout) => {
				tracing::debug!(template = %name, layout = %layout.name, "rendering layout");
				let data = layout_data(data, body, layout.data);

				options.descend()?;
				let output = self.render_async(&layout.name, &data, options).await;
				options.ascend();

				output
			}
			None => Ok(body),
		}
	}
}
