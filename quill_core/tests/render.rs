use quill_core::AnyEmptyResult;
use quill_core::Engine;
use quill_core::QuillError;
use quill_core::RenderOptions;
use rstest::rstest;
use serde_json::Value;
use serde_json::json;
use similar_asserts::assert_eq;

fn render(engine: &Engine, source: &str, data: &Value) -> Result<String, QuillError> {
	engine.render_string(source, data, &mut RenderOptions::new())
}

#[test]
fn upper_filter_applies() -> AnyEmptyResult {
	let engine = Engine::new();
	let output = render(&engine, "{{ it.name | upper }}", &json!({ "name": "john" }))?;

	assert_eq!(output, "JOHN");

	Ok(())
}

#[test]
fn removed_filter_is_not_found() {
	let mut engine = Engine::new();
	assert!(engine.remove_filter("upper"));
	assert!(!engine.has_filter("upper"));

	let result = render(&engine, "{{ it.name | upper }}", &json!({ "name": "john" }));
	assert!(matches!(result, Err(QuillError::FilterNotFound(name)) if name == "upper"));
}

#[test]
fn escapes_by_default() -> AnyEmptyResult {
	let engine = Engine::new();
	let data = json!({ "html": "<p>x</p>" });

	assert_eq!(render(&engine, "{{ it.html }}", &data)?, "&lt;p&gt;x&lt;/p&gt;");
	assert_eq!(render(&engine, "{%~ it.html %}", &data)?, "<p>x</p>");

	let unescaped = engine.with_config(|config| config.auto_escape = false);
	assert_eq!(render(&unescaped, "{{ it.html }}", &data)?, "<p>x</p>");
	assert!(engine.config().auto_escape);

	Ok(())
}

#[test]
fn literal_text_is_preserved() -> AnyEmptyResult {
	let engine = Engine::new();
	let output = render(&engine, "Line 1\r\nIt's a \\ path", &json!({}))?;

	assert_eq!(output, "Line 1\nIt's a \\ path");

	Ok(())
}

#[rstest]
#[case::many(5, "many")]
#[case::one(1, "one")]
#[case::none(0, "none")]
fn conditional_branches(#[case] count: i64, #[case] expected: &str) -> AnyEmptyResult {
	let engine = Engine::new();
	let template = "{% if (it.count > 1) { %}many{% } else if (it.count === 1) { %}one{% } else { %}none{% } %}";
	let output = render(&engine, template, &json!({ "count": count }))?;

	assert_eq!(output, expected);

	Ok(())
}

#[rstest]
#[case::for_of(
	"{% for (let item of it.items) { %}[{{ item }}]{% } %}",
	json!({ "items": ["a", "b"] }),
	"[a][b]"
)]
#[case::for_in_array("{% for (let i in it.items) { %}{{ i }}{% } %}", json!({ "items": ["x", "y"] }), "01")]
#[case::for_in_map("{% for (let key in it.map) { %}{{ key }};{% } %}", json!({ "map": { "a": 1, "b": 2 } }), "a;b;")]
#[case::object_entries(
	"{% for (const [key, value] of Object.entries(it.prices)) { %}{{ key }}={{ value }};{% } %}",
	json!({ "prices": { "apple": 1, "pear": 2 } }),
	"apple=1;pear=2;"
)]
#[case::block_syntax_entries(
	"{% for key, value in prices %}{{ key }}={{ value }};{% endfor %}",
	json!({ "prices": { "apple": 1, "pear": 2 } }),
	"apple=1;pear=2;"
)]
#[case::block_syntax_if(
	"{% if it.admin %}admin{% elsif it.user %}user{% else %}guest{% endif %}",
	json!({ "admin": false, "user": true }),
	"user"
)]
#[case::nested_loops(
	"{% for (let row of it.rows) { %}{% for (let cell of row) { %}{{ cell }}{% } %};{% } %}",
	json!({ "rows": [[1, 2], [3]] }),
	"12;3;"
)]
fn loops_and_blocks(#[case] template: &str, #[case] data: Value, #[case] expected: &str) -> AnyEmptyResult {
	let engine = Engine::new();
	assert_eq!(render(&engine, template, &data)?, expected);

	Ok(())
}

#[rstest]
#[case::filtered_assignment(
	"{% let title = it.title | trim | upper %}<h1>{{ title }}</h1>",
	json!({ "title": "  hi " }),
	"<h1>HI</h1>"
)]
#[case::plain_assignment("{% const total = it.a + it.b; %}{{ total }}", json!({ "a": 1, "b": 2 }), "3")]
#[case::block_syntax_set("{% set total = it.a * 2 %}{{ total }}", json!({ "a": 4 }), "8")]
#[case::raw_filter_argument("{{ it.items | join(it.sep) }}", json!({ "items": ["a", "b"], "sep": "/" }), "a/b")]
#[case::literal_filter_argument("{{ it.price | round(1) }}", json!({ "price": 2.46 }), "2.5")]
#[case::default_filter("{{ it.missing | default('n/a') }}", json!({}), "n/a")]
#[case::strict_operators("{{ it.a !== null && !it.b }}", json!({ "a": 1, "b": false }), "true")]
#[case::comment_only("a{% /* note */ %}b", json!({}), "ab")]
#[case::var_escapes_blocks("{% if (true) { %}{% var x = 1 %}{% } %}{{ x }}", json!({}), "1")]
#[case::filtered_var_escapes_loops(
	"{% for (let n of it.xs) { %}{% var last = n | upper %}{% } %}{{ last }}",
	json!({ "xs": ["a", "b"] }),
	"B"
)]
#[case::null_is_empty("[{{ it.value }}]", json!({ "value": null }), "[]")]
fn assignments_and_expressions(#[case] template: &str, #[case] data: Value, #[case] expected: &str) -> AnyEmptyResult {
	let engine = Engine::new();
	assert_eq!(render(&engine, template, &data)?, expected);

	Ok(())
}

#[test]
fn trim_markers_remove_whitespace() -> AnyEmptyResult {
	let engine = Engine::new();
	let template = "<ul>\n  {%- for (let x of it.xs) { -%}\n  <li>{{ x }}</li>\n  {%- } -%}\n</ul>";
	let output = render(&engine, template, &json!({ "xs": [1, 2] }))?;

	assert_eq!(output, "<ul><li>1</li><li>2</li></ul>");

	Ok(())
}

#[test]
fn custom_filter_with_arguments() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.add_filter("repeat", |value, args| {
		let times = args.first().and_then(Value::as_u64).unwrap_or(1);
		let text = value.as_str().unwrap_or_default().repeat(times as usize);
		Ok(Value::String(text))
	});

	assert!(engine.has_filter("repeat"));
	assert!(engine.get_filter("repeat").is_some());
	assert_eq!(render(&engine, "{{ 'ab' | repeat(3) }}", &json!({}))?, "ababab");

	Ok(())
}

#[test]
fn filters_are_applied_left_to_right() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.add_filter("wrap", |value, args| {
		let wrapper = args.first().and_then(Value::as_str).unwrap_or("|");
		Ok(json!(format!("{wrapper}{}{wrapper}", value.as_str().unwrap_or_default())))
	});

	let output = render(&engine, "{{ it.word | wrap('(') | upper | wrap('*') }}", &json!({ "word": "a" }))?;
	assert_eq!(output, "*(A(*");

	Ok(())
}

#[test]
fn auto_filter_runs_before_escaping() -> AnyEmptyResult {
	let engine = Engine::new().with_config(|config| {
		config.auto_filter = true;
		config.filter_function = std::sync::Arc::new(|value: Value| {
			json!(format!("<{}>", value.as_str().unwrap_or_default()))
		});
	});

	assert_eq!(render(&engine, "{{ it.a }}", &json!({ "a": "x" }))?, "&lt;x&gt;");
	assert_eq!(render(&engine, "{%~ it.a %}", &json!({ "a": "x" }))?, "<x>");

	Ok(())
}

#[test]
fn use_with_exposes_top_level_keys() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.configure(|config| config.use_with = true);

	assert_eq!(render(&engine, "{{ name }} / {{ it.name }}", &json!({ "name": "Ada" }))?, "Ada / Ada");

	Ok(())
}

#[test]
fn custom_var_name() -> AnyEmptyResult {
	let engine = Engine::new().with_config(|config| config.var_name = "data".to_string());
	let output = render(&engine, "{% for item in items %}{{ item }}{% endfor %}", &json!({ "items": [1, 2] }))?;

	assert_eq!(output, "12");

	Ok(())
}

#[test]
fn render_options_are_exposed() -> AnyEmptyResult {
	let engine = Engine::new();
	let mut options = RenderOptions::new().with_meta("lang", "en");
	let output = engine.render_string("{{ options.lang }}", &json!({}), &mut options)?;

	assert_eq!(output, "en");

	Ok(())
}

#[test]
fn includes_render_partials() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.load_template("@item", "<li>{{ it.label }}</li>")?;
	engine.load_template("@title", "<h1>{{ it.title }}</h1>")?;
	engine.load_template(
		"list",
		"{%~ include('title') %}<ul>{% for (let entry of it.entries) { %}{%~ include('@item', entry) %}{% } %}</ul>",
	)?;

	let data = json!({ "title": "Fruit", "entries": [{ "label": "a" }, { "label": "b" }] });
	let output = engine.render("list", &data, &mut RenderOptions::new())?;

	assert_eq!(output, "<h1>Fruit</h1><ul><li>a</li><li>b</li></ul>");

	Ok(())
}

#[test]
fn compiled_templates_keep_their_config() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.load_template("page", "{{ it.html }}")?;
	engine.configure(|config| config.auto_escape = false);

	let data = json!({ "html": "<b>" });
	assert_eq!(engine.render("page", &data, &mut RenderOptions::new())?, "&lt;b&gt;");
	assert_eq!(render(&engine, "{{ it.html }}", &data)?, "<b>");

	Ok(())
}

#[test]
fn block_syntax_can_be_disabled() {
	let engine = Engine::new().with_config(|config| config.block_syntax = false);
	let result = render(&engine, "{% if it.ok %}yes{% endif %}", &json!({ "ok": true }));

	assert!(matches!(result, Err(QuillError::TemplateSyntax { .. })));
}
