//! `quill_core` is the core library for the quill text-template engine. It
//! turns template source into callable artifacts and renders them against
//! JSON data, with filters, partials and layouts.
//!
//! ## Processing Pipeline
//!
//! ```text
//! Template source
//!   → Tokenizer (splits literal text from tags, parses filter chains and assignments)
//!   → Block-syntax rewrite (turns {% if x %}/{% for x in y %} tags into brace form)
//!   → Back end (compiles the AST into an Artifact)
//!   → Engine (caches artifacts by name, renders them and composes layouts)
//! ```
//!
//! ## Tags
//!
//! - `{{ it.name | upper }}` and `{%= it.name %}` write an escaped value.
//! - `{%~ it.html %}` writes a value without escaping.
//! - `{% if (it.ok) { %} ... {% } %}` runs logic.
//! - `{# note #}` is a comment and is dropped.
//!
//! A `-` or `_` right inside a delimiter trims the whitespace of the
//! neighbouring text: `{{- it.name -}}`.
//!
//! ## Key Types
//!
//! - [`Engine`]: Configuration, template cache, filter registry and render
//!   entry points.
//! - [`EngineConfig`]: Delimiters, escaping, trimming and debug options.
//! - [`AstNode`]: A literal segment or a parsed tag.
//! - [`Artifact`]: A compiled template, synchronous or asynchronous.
//! - [`QuillError`]: Every failure the engine can report.
//!
//! ## Quick Start
//!
//! ```rust
//! use quill_core::Engine;
//! use quill_core::RenderOptions;
//! use serde_json::json;
//!
//! let mut engine = Engine::new();
//! engine.load_template("@base", "<main>{%~ it.body %}</main>")?;
//! engine.load_template("page", "{% layout('@base') %}{{ it.title | upper }}")?;
//!
//! let output = engine.render("page", &json!({ "title": "home" }), &mut RenderOptions::new())?;
//! assert_eq!(output, "<main>HOME</main>");
//! # Ok::<(), quill_core::QuillError>(())
//! ```

pub use artifact::*;
pub use ast::*;
pub use cache::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use escape::display_value;
pub use escape::escape_literal;
pub use escape::unescape_literal;
pub use escape::xml_escape;
pub use filter_parser::parse_assignment;
pub use filter_parser::parse_filters;
pub use filters::*;
pub use position::*;
pub use program::Backend;
pub use program::ProgramBackend;
pub use tokenizer::tokenize;
pub use block_syntax::rewrite_block_tags;

mod artifact;
mod ast;
mod block_syntax;
mod cache;
pub mod config;
mod engine;
#[allow(unused_assignments)]
mod error;
mod escape;
mod filter_parser;
mod filters;
mod position;
mod program;
mod tokenizer;
