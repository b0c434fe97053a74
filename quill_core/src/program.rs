//! The default back end. Compiles an AST into a tree of statements and runs
//! it, evaluating every expression with [`minijinja`].
//!
//! Execute tags accept a small statement language:
//!
//! ```text
//! {% let name = it.user.name | upper %}
//! {% if (it.items | length > 0) { %} ... {% } else if (it.admin) { %} ... {% } else { %} ... {% } %}
//! {% for (let item of it.items) { %} ... {% } %}
//! {% for (let [key, value] of Object.entries(it.map)) { %} ... {% } %}
//! {% for (let key in it.map) { %} ... {% } %}
//! {% layout('@base', {'title': 'Home'}) %}
//! {% /* comments are ignored */ %}
//! ```
//!
//! Output tags evaluate their expression, or render a partial when the
//! expression is `include(name[, data])`.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;

use minijinja::Environment;
use minijinja::Expression;
use minijinja::value::ValueKind;
use serde_json::Value;

use crate::Artifact;
use crate::AstNode;
use crate::BoxFuture;
use crate::DeclKeyword;
use crate::Engine;
use crate::EngineConfig;
use crate::FilterArg;
use crate::FilterCall;
use crate::QuillError;
use crate::QuillResult;
use crate::RenderOptions;
use crate::TagKind;
use crate::TagNode;
use crate::escape::display_value;
use crate::escape::unescape_literal;
use crate::filter_parser::is_word_char;
use crate::filter_parser::split_declaration;
use crate::filters::literal_value;
use crate::tokenizer::skip_block_comment;
use crate::tokenizer::skip_string;

static ENVIRONMENT: LazyLock<Environment<'static>> = LazyLock::new(Environment::new);

/// Turns a template AST into a callable [`Artifact`].
pub trait Backend: Send + Sync {
	fn compile(&self, ast: &[AstNode], source: &str, config: &EngineConfig) -> QuillResult<Artifact>;
}

/// The built-in [`Backend`].
///
/// Compiled templates render both synchronously and through
/// [`Engine::render_async`], where partials and layouts may be asynchronous
/// artifacts.
#[derive(Clone, Copy)]
pub struct ProgramBackend {
	env: &'static Environment<'static>,
}

impl ProgramBackend {
	pub fn new() -> Self {
		Self::with_environment(&ENVIRONMENT)
	}

	/// Evaluate expressions with a preconfigured environment. Compiled
	/// expressions borrow it, so it must live for the rest of the program.
	pub fn with_environment(env: &'static Environment<'static>) -> Self {
		Self { env }
	}
}

impl Default for ProgramBackend {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for ProgramBackend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProgramBackend").finish_non_exhaustive()
	}
}

impl Backend for ProgramBackend {
	fn compile(&self, ast: &[AstNode], source: &str, config: &EngineConfig) -> QuillResult<Artifact> {
		let program = Arc::new(Program::build(ast, source, config, self.env)?);
		let sync_program = Arc::clone(&program);

		Ok(Artifact::from_fns(
			move |engine, data, options| sync_program.render(engine, data, options),
			move |engine, data, options| {
				let program = Arc::clone(&program);
				Box::pin(async move { program.render_async(engine, data, options).await })
			},
		))
	}
}

/// A compiled template.
struct Program {
	config: EngineConfig,
	source: String,
	nodes: Vec<Node>,
}

/// An expression compiled once, when the program is built.
struct Compiled {
	/// The normalized expression text.
	source: String,
	expression: Expression<'static, 'static>,
	/// Top-level names read by the expression, sorted, without builtins.
	names: Vec<String>,
}

/// A filter chain whose raw-text arguments are compiled up front.
struct Filters {
	calls: Vec<FilterCall>,
	arguments: HashMap<String, Compiled>,
}

enum Node {
	Text(String),
	Output(Output),
	Declare {
		keyword: DeclKeyword,
		name: String,
		value: Compiled,
		filters: Filters,
		line: Option<usize>,
	},
	If {
		branches: Vec<Branch>,
		otherwise: Option<Vec<Node>>,
	},
	For {
		binding: Binding,
		iterable: Compiled,
		body: Vec<Node>,
		line: Option<usize>,
	},
	Layout {
		name: Compiled,
		data: Option<Compiled>,
		line: Option<usize>,
	},
}

struct Output {
	source: OutputSource,
	filters: Filters,
	raw: bool,
	line: Option<usize>,
}

enum OutputSource {
	Expression(Compiled),
	Include { name: Compiled, data: Option<Compiled> },
}

struct Branch {
	condition: Compiled,
	body: Vec<Node>,
	line: Option<usize>,
}

#[derive(Debug, Clone)]
enum Binding {
	/// `for (let item of items)`
	Item(String),
	/// `for (let [key, value] of Object.entries(map))`
	Entries(String, String),
	/// `for (let key in map)`
	Keys(String),
}

/// A parsed execute-tag statement.
enum Statement {
	Declare {
		keyword: DeclKeyword,
		name: String,
		expression: String,
		filters: Vec<FilterCall>,
	},
	If(String),
	ElseIf(String),
	Else,
	Close,
	For {
		binding: Binding,
		iterable: String,
	},
	Layout {
		name: String,
		data: Option<String>,
	},
}

/// An open block while the statement tree is being built.
enum Frame {
	If {
		statement: String,
		branches: Vec<Branch>,
		/// The condition guarding `body`, `None` once inside `else`.
		condition: Option<(Compiled, Option<usize>)>,
		body: Vec<Node>,
	},
	For {
		statement: String,
		binding: Binding,
		iterable: Compiled,
		body: Vec<Node>,
		line: Option<usize>,
	},
}

impl Program {
	fn build(
		ast: &[AstNode],
		source: &str,
		config: &EngineConfig,
		env: &'static Environment<'static>,
	) -> QuillResult<Self> {
		let mut builder = ProgramBuilder {
			env,
			root: Vec::new(),
			stack: Vec::new(),
		};

		for node in ast {
			match node {
				AstNode::Literal(text) => builder.push(Node::Text(unescape_literal(text).into_owned())),
				AstNode::Tag(tag) => builder.push_tag(tag)?,
			}
		}

		let nodes = builder.finish()?;
		tracing::trace!(nodes = nodes.len(), "compiled program");

		Ok(Self {
			config: config.clone(),
			source: source.to_string(),
			nodes,
		})
	}

	fn render(&self, engine: &Engine, data: &Value, options: &mut RenderOptions) -> QuillResult<String> {
		let mut state = RenderState::new(self, engine, data, options);
		state.run(&self.nodes)?;

		Ok(state.output)
	}

	async fn render_async(
		&self,
		engine: &Engine,
		data: &Value,
		options: &mut RenderOptions,
	) -> QuillResult<String> {
		let mut state = RenderState::new(self, engine, data, options);
		state.run_async(&self.nodes).await?;

		Ok(state.output)
	}
}

struct ProgramBuilder {
	env: &'static Environment<'static>,
	root: Vec<Node>,
	stack: Vec<Frame>,
}

impl ProgramBuilder {
	fn current(&mut self) -> &mut Vec<Node> {
		match self.stack.last_mut() {
			Some(Frame::If { body, .. } | Frame::For { body, .. }) => body,
			None => &mut self.root,
		}
	}

	fn push(&mut self, node: Node) {
		self.current().push(node);
	}

	fn push_tag(&mut self, tag: &TagNode) -> QuillResult<()> {
		let line = tag.line_no;

		match tag.kind {
			TagKind::Interpolate | TagKind::RawInterpolate => {
				let output = self.output(tag)?;
				self.push(Node::Output(output));
			}
			TagKind::Execute => {
				let Some(statement) = parse_statement(tag)? else {
					return Ok(());
				};
				self.statement(statement, &tag.value, line)?;
			}
			TagKind::Literal => self.push(Node::Text(tag.value.clone())),
		}

		Ok(())
	}

	fn output(&self, tag: &TagNode) -> QuillResult<Output> {
		let source = match call_arguments(&tag.value, "include") {
			Some(arguments) => {
				let (name, data) = self.name_and_data(&tag.value, &arguments)?;
				OutputSource::Include { name, data }
			}
			None => OutputSource::Expression(self.expression(&tag.value, &tag.value)?),
		};

		Ok(Output {
			source,
			filters: self.filters(tag.filters.clone().unwrap_or_default(), &tag.value)?,
			raw: tag.kind == TagKind::RawInterpolate,
			line: tag.line_no,
		})
	}

	/// Normalize an expression and compile it.
	fn expression(&self, expression: &str, statement: &str) -> QuillResult<Compiled> {
		let source = normalize_expression(expression);
		let compiled = self
			.env
			.compile_expression_owned(source.clone())
			.map_err(|err| syntax_error(statement, err))?;

		let mut names: Vec<String> = compiled
			.undeclared_variables(false)
			.into_iter()
			.filter(|name| !is_builtin_name(name))
			.collect();
		names.sort();

		Ok(Compiled {
			source,
			expression: compiled,
			names,
		})
	}

	fn filters(&self, calls: Vec<FilterCall>, statement: &str) -> QuillResult<Filters> {
		let mut arguments = HashMap::new();

		for arg in calls.iter().flat_map(|call| &call.args) {
			if let FilterArg::Raw(text) = arg {
				if !arguments.contains_key(text) {
					arguments.insert(text.clone(), self.expression(text, statement)?);
				}
			}
		}

		Ok(Filters { calls, arguments })
	}

	/// The `(name[, data])` arguments of `include` and `layout`.
	fn name_and_data(&self, statement: &str, arguments: &[&str]) -> QuillResult<(Compiled, Option<Compiled>)> {
		match arguments {
			[name] => Ok((self.expression(name, statement)?, None)),
			[name, data] => {
				Ok((
					self.expression(name, statement)?,
					Some(self.expression(data, statement)?),
				))
			}
			_ => Err(syntax_error(statement, "expected a template name and optional data")),
		}
	}

	fn statement(&mut self, statement: Statement, content: &str, line: Option<usize>) -> QuillResult<()> {
		match statement {
			Statement::Declare {
				keyword,
				name,
				expression,
				filters,
			} => {
				let value = self.expression(&expression, content)?;
				let filters = self.filters(filters, content)?;
				self.push(Node::Declare {
					keyword,
					name,
					value,
					filters,
					line,
				});
			}
			Statement::If(condition) => {
				let condition = self.expression(&condition, content)?;
				self.stack.push(Frame::If {
					statement: content.to_string(),
					branches: Vec::new(),
					condition: Some((condition, line)),
					body: Vec::new(),
				});
			}
			Statement::ElseIf(next) => {
				let next = self.expression(&next, content)?;
				self.next_branch(content, Some((next, line)))?;
			}
			Statement::Else => self.next_branch(content, None)?,
			Statement::Close => {
				let node = match self.stack.pop() {
					Some(Frame::If {
						mut branches,
						condition,
						body,
						..
					}) => {
						match condition {
							Some((condition, line)) => {
								branches.push(Branch {
									condition,
									body,
									line,
								});
								Node::If {
									branches,
									otherwise: None,
								}
							}
							None => {
								Node::If {
									branches,
									otherwise: Some(body),
								}
							}
						}
					}
					Some(Frame::For {
						binding,
						iterable,
						body,
						line,
						..
					}) => {
						Node::For {
							binding,
							iterable,
							body,
							line,
						}
					}
					None => return Err(syntax_error(content, "there is no open block to close")),
				};
				self.push(node);
			}
			Statement::For { binding, iterable } => {
				let iterable = self.expression(&iterable, content)?;
				self.stack.push(Frame::For {
					statement: content.to_string(),
					binding,
					iterable,
					body: Vec::new(),
					line,
				});
			}
			Statement::Layout { name, data } => {
				let name = self.expression(&name, content)?;
				let data = data
					.map(|data| self.expression(&data, content))
					.transpose()?;
				self.push(Node::Layout { name, data, line });
			}
		}

		Ok(())
	}

	/// Close the current `if` branch and start the next one. `next` is `None`
	/// for `else`.
	fn next_branch(&mut self, content: &str, next: Option<(Compiled, Option<usize>)>) -> QuillResult<()> {
		let Some(Frame::If {
			branches,
			condition,
			body,
			..
		}) = self.stack.last_mut()
		else {
			return Err(syntax_error(content, "`else` without a matching `if`"));
		};

		let Some((current, line)) = condition.take() else {
			return Err(syntax_error(content, "`if` block already has an `else` branch"));
		};

		branches.push(Branch {
			condition: current,
			body: std::mem::take(body),
			line,
		});
		*condition = next;

		Ok(())
	}

	fn finish(mut self) -> QuillResult<Vec<Node>> {
		if let Some(frame) = self.stack.pop() {
			let (Frame::If { statement, .. } | Frame::For { statement, .. }) = frame;
			return Err(syntax_error(&statement, "the block is never closed"));
		}

		Ok(self.root)
	}
}

fn syntax_error(statement: &str, reason: impl std::fmt::Display) -> QuillError {
	QuillError::TemplateSyntax {
		statement: statement.to_string(),
		reason: reason.to_string(),
	}
}

/// Parse the content of an execute tag. Returns `None` for content that is
/// empty once comments are removed.
fn parse_statement(tag: &TagNode) -> QuillResult<Option<Statement>> {
	if let Some(assignment) = &tag.assignment {
		return Ok(Some(Statement::Declare {
			keyword: assignment.decl_keyword,
			name: assignment.var_name.clone(),
			expression: assignment.value_expr.clone(),
			filters: assignment.filters.clone(),
		}));
	}

	let content = &tag.value;
	let stripped = strip_comments(content);
	let code = stripped.trim().trim_end_matches(';').trim_end();

	if code.is_empty() {
		return Ok(None);
	}

	if code == "}" {
		return Ok(Some(Statement::Close));
	}

	let unsupported = || syntax_error(content, "unsupported statement");

	if let Some(rest) = code.strip_prefix('}') {
		let rest = rest.trim_start().strip_prefix("else").ok_or_else(unsupported)?.trim_start();
		if rest == "{" {
			return Ok(Some(Statement::Else));
		}

		let condition = keyword_rest(rest, "if")
			.and_then(block_condition)
			.ok_or_else(unsupported)?;
		return Ok(Some(Statement::ElseIf(condition.to_string())));
	}

	if let Some(rest) = keyword_rest(code, "if") {
		let condition = block_condition(rest).ok_or_else(unsupported)?;
		return Ok(Some(Statement::If(condition.to_string())));
	}

	if let Some(rest) = keyword_rest(code, "for") {
		return parse_for(rest)
			.map(Some)
			.ok_or_else(|| syntax_error(content, "unsupported `for` loop"));
	}

	if let Some(arguments) = call_arguments(code, "layout") {
		return match arguments.as_slice() {
			[name] => {
				Ok(Some(Statement::Layout {
					name: (*name).to_string(),
					data: None,
				}))
			}
			[name, data] => {
				Ok(Some(Statement::Layout {
					name: (*name).to_string(),
					data: Some((*data).to_string()),
				}))
			}
			_ => Err(syntax_error(content, "expected a template name and optional data")),
		};
	}

	if let Some((keyword, name, expression)) = split_declaration(code) {
		return Ok(Some(Statement::Declare {
			keyword,
			name: name.to_string(),
			expression: expression.to_string(),
			filters: Vec::new(),
		}));
	}

	Err(unsupported())
}

/// `(let item of items) {`, `(let [k, v] of Object.entries(map)) {` or
/// `(let key in map) {`.
fn parse_for(rest: &str) -> Option<Statement> {
	let head = strip_parens(rest.strip_suffix('{')?.trim_end())?;
	let head = ["let", "const", "var"]
		.iter()
		.find_map(|keyword| keyword_rest(head, keyword))?;

	if let Some(destructure) = head.strip_prefix('[') {
		let (names, rest) = destructure.split_once(']')?;
		let (key, value) = names.split_once(',')?;
		let (key, value) = (key.trim(), value.trim());
		if !is_identifier(key) || !is_identifier(value) {
			return None;
		}

		let source = keyword_rest(rest.trim_start(), "of")?;
		let arguments = call_arguments(source, "Object.entries")?;
		let [map] = arguments.as_slice() else {
			return None;
		};

		return Some(Statement::For {
			binding: Binding::Entries(key.to_string(), value.to_string()),
			iterable: map.to_string(),
		});
	}

	let name_end = head.find(|ch: char| !is_word_char(ch)).unwrap_or(head.len());
	let (name, rest) = head.split_at(name_end);
	if !is_identifier(name) {
		return None;
	}
	let rest = rest.trim_start();

	let (binding, iterable) = if let Some(iterable) = keyword_rest(rest, "of") {
		(Binding::Item(name.to_string()), iterable)
	} else {
		(Binding::Keys(name.to_string()), keyword_rest(rest, "in")?)
	};

	(!iterable.is_empty()).then(|| {
		Statement::For {
			binding,
			iterable: iterable.to_string(),
		}
	})
}

/// The condition of `(cond) {`.
fn block_condition(rest: &str) -> Option<&str> {
	let condition = strip_parens(rest.strip_suffix('{')?.trim_end())?;
	(!condition.is_empty()).then_some(condition)
}

/// The text after `keyword` when it is followed by whitespace, `(` or `[`.
fn keyword_rest<'a>(code: &'a str, keyword: &str) -> Option<&'a str> {
	let rest = code.strip_prefix(keyword)?;
	let next = rest.chars().next()?;

	(next.is_whitespace() || next == '(' || next == '[').then(|| rest.trim_start())
}

/// The top-level arguments of `name(...)` when `code` is exactly that call.
fn call_arguments<'a>(code: &'a str, name: &str) -> Option<Vec<&'a str>> {
	let arguments = strip_parens(code.strip_prefix(name)?.trim_start())?;
	Some(split_arguments(arguments))
}

/// Strip one pair of parentheses wrapping the whole of `text`.
fn strip_parens(text: &str) -> Option<&str> {
	if !text.starts_with('(') {
		return None;
	}

	let close = closing_bracket(text, 0)?;
	(close + 1 == text.len()).then(|| text[1..close].trim())
}

/// Offset of the bracket closing the one at `open`, stepping over strings.
fn closing_bracket(text: &str, open: usize) -> Option<usize> {
	let mut depth = 0usize;
	let mut index = open;

	while let Some(ch) = text[index..].chars().next() {
		match ch {
			'\'' | '"' | '`' => {
				index = skip_string(text, index)?;
				continue;
			}
			'(' | '[' | '{' => depth += 1,
			')' | ']' | '}' => {
				depth = depth.checked_sub(1)?;
				if depth == 0 {
					return Some(index);
				}
			}
			_ => {}
		}

		index += ch.len_utf8();
	}

	None
}

/// Split on commas that are outside brackets and strings.
fn split_arguments(text: &str) -> Vec<&str> {
	if text.trim().is_empty() {
		return Vec::new();
	}

	let mut arguments = Vec::new();
	let mut depth = 0usize;
	let mut start = 0;
	let mut index = 0;

	while let Some(ch) = text[index..].chars().next() {
		match ch {
			'\'' | '"' | '`' => {
				index = skip_string(text, index).unwrap_or(text.len());
				continue;
			}
			'(' | '[' | '{' => depth += 1,
			')' | ']' | '}' => depth = depth.saturating_sub(1),
			',' if depth == 0 => {
				arguments.push(text[start..index].trim());
				start = index + 1;
			}
			_ => {}
		}

		index += ch.len_utf8();
	}

	arguments.push(text[start..].trim());
	arguments
}

/// Replace block comments outside strings with a space.
fn strip_comments(content: &str) -> String {
	let mut stripped = String::with_capacity(content.len());
	let mut index = 0;

	while let Some(ch) = content[index..].chars().next() {
		match ch {
			'\'' | '"' | '`' => {
				let end = skip_string(content, index).unwrap_or(content.len());
				stripped.push_str(&content[index..end]);
				index = end;
			}
			'/' if content[index..].starts_with("/*") => {
				index = skip_block_comment(content, index).unwrap_or(content.len());
				stripped.push(' ');
			}
			_ => {
				stripped.push(ch);
				index += ch.len_utf8();
			}
		}
	}

	stripped
}

/// Rewrite JavaScript operator spellings into their expression-language
/// equivalents. String literals are left untouched.
pub(crate) fn normalize_expression(expression: &str) -> String {
	const OPERATORS: [(&str, &str); 4] = [("===", "=="), ("!==", "!="), ("&&", " and "), ("||", " or ")];

	let mut normalized = String::with_capacity(expression.len() + 8);
	let mut index = 0;

	'scan: while let Some(ch) = expression[index..].chars().next() {
		let rest = &expression[index..];

		for (operator, replacement) in OPERATORS {
			if rest.starts_with(operator) {
				normalized.push_str(replacement);
				index += operator.len();
				continue 'scan;
			}
		}

		match ch {
			'\'' | '"' | '`' => {
				let end = skip_string(expression, index).unwrap_or(expression.len());
				normalized.push_str(&expression[index..end]);
				index = end;
			}
			'!' if !rest.starts_with("!=") => {
				normalized.push_str(" not ");
				index += 1;
			}
			_ if ch.is_alphabetic() || ch == '_' => {
				let length = rest.find(|ch: char| !is_word_char(ch)).unwrap_or(rest.len());
				let word = &rest[..length];
				let is_property = normalized.trim_end().ends_with('.');

				if !is_property && matches!(word, "null" | "undefined") {
					normalized.push_str("none");
				} else {
					normalized.push_str(word);
				}
				index += length;
			}
			_ => {
				normalized.push(ch);
				index += ch.len_utf8();
			}
		}
	}

	normalized.trim().to_string()
}

fn is_identifier(text: &str) -> bool {
	text.chars().next().is_some_and(|ch| ch.is_alphabetic() || ch == '_') && text.chars().all(is_word_char)
}

/// Names provided by the expression language itself.
fn is_builtin_name(name: &str) -> bool {
	matches!(
		name,
		"loop" | "self" | "super" | "none" | "namespace" | "range" | "dict" | "debug" | "cycler" | "joiner"
	)
}

type Context = BTreeMap<String, minijinja::Value>;

/// Mutable state of a single render.
struct RenderState<'a> {
	program: &'a Program,
	engine: &'a Engine,
	data: &'a Value,
	options: &'a mut RenderOptions,
	/// The data, the options and, with `use_with`, every top-level data key.
	globals: Context,
	/// Block scopes, innermost last. The first one holds `var` declarations.
	scopes: Vec<Context>,
	output: String,
}

impl<'a> RenderState<'a> {
	fn new(
		program: &'a Program,
		engine: &'a Engine,
		data: &'a Value,
		options: &'a mut RenderOptions,
	) -> Self {
		let mut globals = Context::new();

		if program.config.use_with {
			if let Value::Object(map) = data {
				for (key, value) in map {
					globals.insert(key.clone(), minijinja::Value::from_serialize(value));
				}
			}
		}

		globals.insert(program.config.var_name.clone(), minijinja::Value::from_serialize(data));
		globals.insert("options".to_string(), minijinja::Value::from_serialize(&options.meta));

		Self {
			program,
			engine,
			data,
			options,
			globals,
			scopes: vec![Context::new()],
			output: String::new(),
		}
	}

	fn run(&mut self, nodes: &[Node]) -> QuillResult<()> {
		for node in nodes {
			match node {
				Node::Output(output) => {
					let value = match &output.source {
						OutputSource::Expression(expression) => self.eval_json(expression, output.line)?,
						OutputSource::Include { name, data } => {
							let (name, data, mut options) = self.include(name, data.as_ref(), output.line)?;
							Value::String(self.engine.render(&name, &data, &mut options)?)
						}
					};
					self.write(output, value)?;
				}
				Node::If { branches, otherwise } => {
					if let Some(body) = self.select_branch(branches, otherwise.as_deref())? {
						self.run_block(body, Context::new())?;
					}
				}
				Node::For {
					binding,
					iterable,
					body,
					line,
				} => {
					for bindings in self.loop_bindings(binding, iterable, *line)? {
						self.run_block(body, bindings)?;
					}
				}
				other => self.run_statement(other)?,
			}
		}

		Ok(())
	}

	/// Run `nodes` in a new block scope.
	fn run_block(&mut self, nodes: &[Node], bindings: Context) -> QuillResult<()> {
		self.scopes.push(bindings);
		let result = self.run(nodes);
		self.scopes.pop();

		result
	}

	/// The same walk as [`RenderState::run`], rendering partials through
	/// [`Engine::render_async`].
	fn run_async<'s>(&'s mut self, nodes: &'s [Node]) -> BoxFuture<'s, QuillResult<()>> {
		Box::pin(async move {
			for node in nodes {
				match node {
					Node::Output(output) => {
						let value = match &output.source {
							OutputSource::Expression(expression) => self.eval_json(expression, output.line)?,
							OutputSource::Include { name, data } => {
								let (name, data, mut options) = self.include(name, data.as_ref(), output.line)?;
								let text = self.engine.render_async(&name, &data, &mut options).await?;
								Value::String(text)
							}
						};
						self.write(output, value)?;
					}
					Node::If { branches, otherwise } => {
						if let Some(body) = self.select_branch(branches, otherwise.as_deref())? {
							self.run_block_async(body, Context::new()).await?;
						}
					}
					Node::For {
						binding,
						iterable,
						body,
						line,
					} => {
						for bindings in self.loop_bindings(binding, iterable, *line)? {
							self.run_block_async(body, bindings).await?;
						}
					}
					other => self.run_statement(other)?,
				}
			}

			Ok(())
		})
	}

	async fn run_block_async(&mut self, nodes: &[Node], bindings: Context) -> QuillResult<()> {
		self.scopes.push(bindings);
		let result = self.run_async(nodes).await;
		self.scopes.pop();

		result
	}

	/// Nodes that never render other templates. Blocks and output are
	/// handled by the walkers.
	fn run_statement(&mut self, node: &Node) -> QuillResult<()> {
		match node {
			Node::Text(text) => self.output.push_str(text),
			Node::Declare {
				keyword,
				name,
				value,
				filters,
				line,
			} => {
				let value = self.eval_json(value, *line)?;
				let value = self.apply_filters(value, filters, *line)?;

				let scope = match keyword {
					DeclKeyword::Var => self.scopes.first_mut(),
					DeclKeyword::Let | DeclKeyword::Const => self.scopes.last_mut(),
				};
				if let Some(scope) = scope {
					scope.insert(name.clone(), minijinja::Value::from_serialize(&value));
				}
			}
			Node::Layout { name, data, line } => {
				let name = self.template_name(name, *line)?;
				let data = match data {
					Some(data) => self.eval_json(data, *line)?,
					None => Value::Null,
				};

				tracing::trace!(layout = %name, "layout requested");
				self.options.request_layout(name, data);
			}
			Node::Output(_) | Node::If { .. } | Node::For { .. } => {}
		}

		Ok(())
	}

	/// The body of the first branch whose condition holds.
	fn select_branch<'n>(
		&self,
		branches: &'n [Branch],
		otherwise: Option<&'n [Node]>,
	) -> QuillResult<Option<&'n [Node]>> {
		for branch in branches {
			if self.eval(&branch.condition, branch.line)?.is_true() {
				return Ok(Some(&branch.body));
			}
		}

		Ok(otherwise)
	}

	/// The scope bindings of every loop iteration.
	fn loop_bindings(
		&self,
		binding: &Binding,
		iterable: &Compiled,
		line: Option<usize>,
	) -> QuillResult<Vec<Context>> {
		let source = self.eval(iterable, line)?;
		let kind = source.kind();

		if matches!(kind, ValueKind::Undefined | ValueKind::None) {
			return Err(self.runtime_error("TypeError", format!("{} is not iterable", iterable.source), line));
		}

		let keys: Vec<minijinja::Value> = source
			.try_iter()
			.map_err(|err| self.minijinja_error(&err, line))?
			.collect();

		let mut iterations = Vec::with_capacity(keys.len());

		for (index, key) in keys.into_iter().enumerate() {
			let mut bindings = Context::new();

			match (binding, kind) {
				(Binding::Item(name), _) | (Binding::Keys(name), ValueKind::Map) => {
					bindings.insert(name.clone(), key);
				}
				(Binding::Keys(name), _) => {
					bindings.insert(name.clone(), minijinja::Value::from(index.to_string()));
				}
				(Binding::Entries(key_name, value_name), ValueKind::Map) => {
					let value = source
						.get_item(&key)
						.map_err(|err| self.minijinja_error(&err, line))?;
					bindings.insert(key_name.clone(), key);
					bindings.insert(value_name.clone(), value);
				}
				(Binding::Entries(key_name, value_name), _) => {
					bindings.insert(key_name.clone(), minijinja::Value::from(index.to_string()));
					bindings.insert(value_name.clone(), key);
				}
			}

			iterations.push(bindings);
		}

		Ok(iterations)
	}

	/// Filter, display and escape an output value, then append it.
	fn write(&mut self, output: &Output, value: Value) -> QuillResult<()> {
		let config = &self.program.config;

		let mut value = self.apply_filters(value, &output.filters, output.line)?;
		if config.auto_filter {
			value = (config.filter_function)(value);
		}

		let text = display_value(&value);
		if output.raw || !config.auto_escape {
			self.output.push_str(&text);
		} else {
			self.output.push_str(&(config.escape_function)(&text));
		}

		Ok(())
	}

	/// Resolve the target of a partial. Without explicit data the partial sees
	/// the current data.
	fn include(
		&self,
		name: &Compiled,
		data: Option<&Compiled>,
		line: Option<usize>,
	) -> QuillResult<(String, Value, RenderOptions)> {
		let name = self.template_name(name, line)?;
		let data = match data {
			Some(data) => self.eval_json(data, line)?,
			None => self.data.clone(),
		};

		Ok((name, data, self.options.nested()?))
	}

	fn template_name(&self, expression: &Compiled, line: Option<usize>) -> QuillResult<String> {
		let value = self.eval_json(expression, line)?;
		Ok(display_value(&value))
	}

	fn apply_filters(&self, value: Value, filters: &Filters, line: Option<usize>) -> QuillResult<Value> {
		if filters.calls.is_empty() {
			return Ok(value);
		}

		self.engine
			.filters()
			.apply(value, &filters.calls, |arg| self.filter_arg(arg, filters, line))
			.map_err(|err| {
				match err {
					QuillError::FilterNotFound(_) | QuillError::Runtime { .. } => err,
					other => self.runtime_error("FilterError", other, line),
				}
			})
	}

	fn filter_arg(&self, arg: &FilterArg, filters: &Filters, line: Option<usize>) -> QuillResult<Value> {
		if let Some(value) = literal_value(arg) {
			return Ok(value);
		}

		match arg {
			FilterArg::Raw(text) => {
				match filters.arguments.get(text) {
					Some(expression) => self.eval_json(expression, line),
					None => Ok(Value::Null),
				}
			}
			_ => Ok(Value::Null),
		}
	}

	fn context(&self) -> Context {
		let mut context = self.globals.clone();
		for scope in &self.scopes {
			context.extend(scope.iter().map(|(key, value)| (key.clone(), value.clone())));
		}

		context
	}

	fn eval(&self, compiled: &Compiled, line: Option<usize>) -> QuillResult<minijinja::Value> {
		let context = self.context();

		if let Some(name) = compiled.names.iter().find(|name| !context.contains_key(*name)) {
			return Err(self.runtime_error("ReferenceError", format!("{name} is not defined"), line));
		}

		compiled
			.expression
			.eval(&context)
			.map_err(|err| self.minijinja_error(&err, line))
	}

	fn eval_json(&self, compiled: &Compiled, line: Option<usize>) -> QuillResult<Value> {
		let value = self.eval(compiled, line)?;
		if value.is_undefined() {
			return Ok(Value::Null);
		}

		serde_json::to_value(&value).map_err(|err| self.runtime_error("TypeError", err, line))
	}

	fn runtime_error(&self, name: &str, message: impl std::fmt::Display, line: Option<usize>) -> QuillError {
		QuillError::runtime(name, message, &self.program.source, line)
	}

	fn minijinja_error(&self, err: &minijinja::Error, line: Option<usize>) -> QuillError {
		self.runtime_error(&format!("{:?}", err.kind()), err, line)
	}
}
