use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;

use crate::Engine;
use crate::QuillError;
use crate::QuillResult;

/// How deep layouts and includes may nest before a render fails.
pub const MAX_RENDER_DEPTH: usize = 64;

/// A boxed future returned by asynchronous artifacts.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A synchronous template callable.
pub type SyncRender =
	Arc<dyn Fn(&Engine, &Value, &mut RenderOptions) -> QuillResult<String> + Send + Sync>;

/// An asynchronous template callable.
pub type AsyncRender = Arc<
	dyn for<'a> Fn(&'a Engine, &'a Value, &'a mut RenderOptions) -> BoxFuture<'a, QuillResult<String>>
		+ Send
		+ Sync,
>;

/// A compiled template, ready to be invoked with different data.
///
/// Artifacts are reference counted so cloning one is cheap and a cache entry
/// can be shared between engines derived with [`Engine::with_config`].
#[derive(Clone)]
pub enum Artifact {
	Sync(SyncRender),
	Async(AsyncRender),
	/// Renders synchronously through `sync` and asynchronously through
	/// `async_render`, which may await nested asynchronous templates.
	Dual {
		sync: SyncRender,
		async_render: AsyncRender,
	},
}

impl Artifact {
	/// Wrap a synchronous closure.
	pub fn from_fn(
		render: impl Fn(&Engine, &Value, &mut RenderOptions) -> QuillResult<String> + Send + Sync + 'static,
	) -> Self {
		Self::Sync(Arc::new(render))
	}

	/// Wrap an asynchronous closure.
	///
	/// ```rust
	/// use quill_core::Artifact;
	///
	/// let artifact = Artifact::from_async_fn(|_engine, data, _options| {
	/// 	let name = data["name"].as_str().unwrap_or_default().to_string();
	/// 	Box::pin(async move { Ok(format!("Hello {name}")) })
	/// });
	///
	/// assert!(artifact.is_async());
	/// ```
	pub fn from_async_fn(
		render: impl for<'a> Fn(
			&'a Engine,
			&'a Value,
			&'a mut RenderOptions,
		) -> BoxFuture<'a, QuillResult<String>>
		+ Send
		+ Sync
		+ 'static,
	) -> Self {
		Self::Async(Arc::new(render))
	}

	/// Pair a synchronous closure with an asynchronous one producing the same
	/// output.
	pub fn from_fns(
		sync: impl Fn(&Engine, &Value, &mut RenderOptions) -> QuillResult<String> + Send + Sync + 'static,
		async_render: impl for<'a> Fn(
			&'a Engine,
			&'a Value,
			&'a mut RenderOptions,
		) -> BoxFuture<'a, QuillResult<String>>
		+ Send
		+ Sync
		+ 'static,
	) -> Self {
		Self::Dual {
			sync: Arc::new(sync),
			async_render: Arc::new(async_render),
		}
	}

	/// Whether the artifact can only be rendered with
	/// [`Engine::render_async`].
	pub fn is_async(&self) -> bool {
		matches!(self, Self::Async(_))
	}
}

impl std::fmt::Debug for Artifact {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Sync(_) => write!(f, "Artifact::Sync"),
			Self::Async(_) => write!(f, "Artifact::Async"),
			Self::Dual { .. } => write!(f, "Artifact::Dual"),
		}
	}
}

/// A layout requested by a template while it was rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutRequest {
	pub name: String,
	/// Extra data merged over the child's data when the layout renders.
	pub data: Value,
}

/// Per-render options passed to every artifact.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
	/// Arbitrary values exposed to templates as `options`.
	pub meta: Map<String, Value>,
	layout: Option<LayoutRequest>,
	depth: usize,
}

impl RenderOptions {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.meta.insert(key.into(), value.into());
		self
	}

	/// Ask the renderer to wrap the current output in the layout `name`. A
	/// later request replaces an earlier one.
	pub fn request_layout(&mut self, name: impl Into<String>, data: Value) {
		self.layout = Some(LayoutRequest {
			name: name.into(),
			data,
		});
	}

	pub fn layout(&self) -> Option<&LayoutRequest> {
		self.layout.as_ref()
	}

	/// Remove and return the pending layout request.
	pub fn take_layout(&mut self) -> Option<LayoutRequest> {
		self.layout.take()
	}

	/// Number of enclosing layouts and includes.
	pub fn depth(&self) -> usize {
		self.depth
	}

	/// Options for a partial: the same meta, no pending layout and one level
	/// deeper.
	pub(crate) fn nested(&self) -> QuillResult<Self> {
		let depth = check_depth(self.depth + 1)?;

		Ok(Self {
			meta: self.meta.clone(),
			layout: None,
			depth,
		})
	}

	/// Enter a layout. Pair with [`RenderOptions::ascend`].
	pub(crate) fn descend(&mut self) -> QuillResult<()> {
		self.depth = check_depth(self.depth + 1)?;
		Ok(())
	}

	pub(crate) fn ascend(&mut self) {
		self.depth = self.depth.saturating_sub(1);
	}
}

fn check_depth(depth: usize) -> QuillResult<usize> {
	if depth > MAX_RENDER_DEPTH {
		return Err(QuillError::Runtime {
			name: "RangeError".to_string(),
			message: format!("templates are nested more than {MAX_RENDER_DEPTH} levels deep"),
		});
	}

	Ok(depth)
}

/// Merge the rendered `body` into a layout's data. The child's data comes
/// first, then `body`, then the layout's own data, so layout keys win.
pub(crate) fn layout_data(data: &Value, body: String, layout: Value) -> Value {
	let mut merged = match data {
		Value::Object(map) => map.clone(),
		_ => Map::new(),
	};

	merged.insert("body".to_string(), Value::String(body));

	if let Value::Object(extra) = layout {
		merged.extend(extra);
	}

	Value::Object(merged)
}
