use quill_core::AnyEmptyResult;
use quill_core::Artifact;
use quill_core::Engine;
use quill_core::MAX_RENDER_DEPTH;
use quill_core::QuillError;
use quill_core::RenderOptions;
use serde_json::json;
use similar_asserts::assert_eq;

#[test]
fn layout_wraps_body() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.load_template("@base", "<html>{%~ it.body %}</html>")?;
	engine.load_template("page", "{% layout('@base') %}<p>{{ it.title }}</p>")?;

	let output = engine.render("page", &json!({ "title": "Hi" }), &mut RenderOptions::new())?;
	assert_eq!(output, "<html><p>Hi</p></html>");

	Ok(())
}

#[test]
fn layout_data_takes_precedence() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.load_template("base", "{{ it.title }}|{{ it.author }}|{%~ it.body %}")?;
	engine.load_template("page", "{% layout('base', {'title': 'Layout'}) %}{{ it.title }}")?;

	let data = json!({ "title": "Child", "author": "Ada" });
	let output = engine.render("page", &data, &mut RenderOptions::new())?;
	assert_eq!(output, "Layout|Ada|Child");

	Ok(())
}

#[test]
fn layouts_nest() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.load_template("outer", "[{%~ it.body %}]")?;
	engine.load_template("inner", "{% layout('outer') %}({%~ it.body %})")?;
	engine.load_template("page", "{% layout('inner') %}x")?;

	let output = engine.render("page", &json!({}), &mut RenderOptions::new())?;
	assert_eq!(output, "[(x)]");

	Ok(())
}

#[test]
fn layout_chosen_at_runtime() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.load_template("@wide", "wide:{%~ it.body %}")?;
	engine.load_template("@narrow", "narrow:{%~ it.body %}")?;
	engine.load_template(
		"page",
		"{% if (it.wide) { %}{% layout('@wide') %}{% } else { %}{% layout('@narrow') %}{% } %}body",
	)?;

	let wide = engine.render("page", &json!({ "wide": true }), &mut RenderOptions::new())?;
	let narrow = engine.render("page", &json!({ "wide": false }), &mut RenderOptions::new())?;
	assert_eq!(wide, "wide:body");
	assert_eq!(narrow, "narrow:body");

	Ok(())
}

#[test]
fn artifacts_can_request_layouts() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.load_template("shell", "<{{ it.tag }}>{%~ it.body %}</{{ it.tag }}>")?;
	engine.define(
		"custom",
		Artifact::from_fn(|_, _, options| {
			options.request_layout("shell", json!({ "tag": "section" }));
			Ok("content".to_string())
		}),
	);

	let output = engine.render("custom", &json!({}), &mut RenderOptions::new())?;
	assert_eq!(output, "<section>content</section>");

	Ok(())
}

#[test]
fn missing_layout_fails() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.load_template("page", "{% layout('ghost') %}x")?;

	let result = engine.render("page", &json!({}), &mut RenderOptions::new());
	assert!(matches!(result, Err(QuillError::NameResolution(name)) if name == "ghost"));

	Ok(())
}

#[test]
fn self_referencing_layout_fails() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.load_template("page", "{% layout('page') %}x")?;

	let error = engine
		.render("page", &json!({}), &mut RenderOptions::new())
		.unwrap_err();
	assert_eq!(error.name(), "RangeError");

	Ok(())
}

#[test]
fn reused_options_do_not_accumulate_depth() -> AnyEmptyResult {
	let mut engine = Engine::new();
	engine.load_template("@base", "<{%~ it.body %}>")?;
	engine.load_template("page", "{% layout('base') %}x")?;

	let mut options = RenderOptions::new();
	for _ in 0..=MAX_RENDER_DEPTH {
		assert_eq!(engine.render("page", &json!({}), &mut options)?, "<x>");
	}
	assert_eq!(options.depth(), 0);

	Ok(())
}
