use quill_core::AnyEmptyResult;
use quill_core::Artifact;
use quill_core::Engine;
use quill_core::ParseErrorKind;
use quill_core::QuillError;
use quill_core::RenderOptions;
use rstest::rstest;
use serde_json::Value;
use serde_json::json;
use similar_asserts::assert_eq;

fn render_error(engine: &Engine, source: &str, data: &Value) -> QuillError {
	match engine.render_string(source, data, &mut RenderOptions::new()) {
		Ok(output) => panic!("expected {source:?} to fail, rendered {output:?}"),
		Err(error) => error,
	}
}

#[test]
fn unknown_filter_message() {
	let error = render_error(&Engine::new(), "{{ it.name | shout }}", &json!({ "name": "a" }));

	assert_eq!(error.to_string(), "filter `shout` not found");
	assert_eq!(error.name(), "FilterNotFoundError");
}

#[test]
fn unknown_template_message() {
	let error = Engine::new()
		.render("@nope", &json!({}), &mut RenderOptions::new())
		.unwrap_err();

	assert!(matches!(&error, QuillError::NameResolution(name) if name == "@nope"));
	assert_eq!(error.to_string(), "failed to get template `@nope`");
}

#[test]
fn parse_errors_surface_from_compile() {
	let error = Engine::new().compile("<p>\n  {{ it.x").unwrap_err();

	let QuillError::Parse(parse) = &error else {
		panic!("expected a parse error, got {error:?}");
	};
	assert_eq!(parse.kind, ParseErrorKind::UnclosedTag);
	assert_eq!((parse.line, parse.column, parse.offset), (2, 3, 6));
}

#[test]
fn undefined_name_is_a_reference_error() {
	let error = render_error(&Engine::new(), "{{ missing }}", &json!({}));

	assert!(matches!(&error, QuillError::Runtime { name, .. } if name == "ReferenceError"));
	assert_eq!(error.to_string(), "missing is not defined");
}

#[test]
fn block_scoped_variables_do_not_leak() {
	let template = "{% if (true) { %}{% let inner = 1 %}{{ inner }}{% } %}{{ inner }}";
	let error = render_error(&Engine::new(), template, &json!({}));

	assert_eq!(error.name(), "ReferenceError");
	assert_eq!(error.to_string(), "inner is not defined");
}

#[test]
fn debug_mode_adds_source_window() {
	let engine = Engine::new().with_config(|config| config.debug = true);
	let error = render_error(&engine, "<p>\n{{ nope }}\n</p>", &json!({}));

	assert_eq!(error.name(), "ReferenceError");
	assert_eq!(
		error.to_string(),
		"line 2\n    1| <p>\n >> 2| {{ nope }}\n    3| </p>\n\nnope is not defined"
	);
}

#[test]
fn iterating_nothing_is_a_type_error() {
	let error = render_error(&Engine::new(), "{% for (let x of it.missing) { %}{% } %}", &json!({}));

	assert_eq!(error.name(), "TypeError");
	assert_eq!(error.to_string(), "it.missing is not iterable");
}

#[rstest]
#[case::unclosed_block("{% if (it.a) { %}x")]
#[case::stray_close("x{% } %}")]
#[case::else_without_if("{% } else { %}")]
#[case::double_else("{% if (it.a) { %}{% } else { %}{% } else { %}{% } %}")]
#[case::unsupported_statement("{% while (true) { %}{% } %}")]
#[case::bad_expression("{{ it.a + }}")]
#[case::bad_layout_arguments("{% layout() %}")]
fn template_syntax_errors(#[case] source: &str) {
	let result = Engine::new().compile(source);

	assert!(
		matches!(result, Err(QuillError::TemplateSyntax { .. })),
		"expected a syntax error for {source:?}, got {result:?}"
	);
}

#[test]
fn filter_failures_are_runtime_errors() {
	let mut engine = Engine::new();
	engine.add_filter("disk", |_, _| Err(std::io::Error::other("disk is full").into()));
	engine.add_filter("range", |_, _| {
		Err(QuillError::Runtime {
			name: "RangeError".to_string(),
			message: "out of range".to_string(),
		})
	});

	let wrapped = render_error(&engine, "{{ it | disk }}", &json!({}));
	assert_eq!(wrapped.name(), "FilterError");
	assert_eq!(wrapped.to_string(), "disk is full");

	let kept = render_error(&engine, "{{ it | range }}", &json!({}));
	assert_eq!(kept.name(), "RangeError");
}

#[test]
fn async_templates_need_async_render() {
	let mut engine = Engine::new();
	engine.define(
		"slow",
		Artifact::from_async_fn(|_, _, _| Box::pin(async { Ok("late".to_string()) })),
	);

	let error = engine
		.render("slow", &json!({}), &mut RenderOptions::new())
		.unwrap_err();

	assert!(matches!(&error, QuillError::AsyncTemplate(name) if name == "slow"));
}

#[test]
fn mutual_includes_fail() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.load_template("@ping", "ping {%~ include('pong') %}")?;
	engine.load_template("@pong", "pong {%~ include('ping') %}")?;

	let error = engine
		.render("ping", &json!({}), &mut RenderOptions::new())
		.unwrap_err();
	assert_eq!(error.name(), "RangeError");

	Ok(())
}

#[rstest]
#[case::multi_line_block("{% if\nit.a %}x{% endif %}\n{{ ' }}", 3, 4)]
#[case::block_on_same_line("{% if it.a %}{{ ' }}", 1, 17)]
#[case::for_before_error("{% for x in items %}\n{% endfor %}{% '", 2, 16)]
fn block_tags_keep_source_positions(#[case] source: &str, #[case] line: usize, #[case] column: usize) {
	let error = Engine::new().compile(source).unwrap_err();

	let QuillError::Parse(parse) = &error else {
		panic!("expected a parse error, got {error:?}");
	};
	assert_eq!(parse.kind, ParseErrorKind::UnclosedString);
	assert_eq!((parse.line, parse.column), (line, column));
}

#[test]
fn debug_lines_follow_multi_line_block_tags() {
	let engine = Engine::new().with_config(|config| config.debug = true);
	let error = render_error(&engine, "{% if\n  it.ok %}\n{{ nope }}{% endif %}", &json!({ "ok": true }));

	assert_eq!(error.name(), "ReferenceError");
	assert!(error.to_string().starts_with("line 3\n"), "{error}");
}
