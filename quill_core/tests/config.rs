use std::fs;

use quill_core::AnyEmptyResult;
use quill_core::Engine;
use quill_core::EngineConfig;
use quill_core::QuillError;
use quill_core::RenderOptions;
use serde_json::json;
use similar_asserts::assert_eq;

#[test]
fn loads_config_from_disk() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let path = tmp.path().join("quill.toml");
	fs::write(
		&path,
		r#"
auto_escape = false
var_name = "page"

[delimiters]
output = { open = "[[", close = "]]" }
"#,
	)?;

	let config = EngineConfig::load(&path)?;
	let engine = Engine::with_engine_config(config);
	let output = engine.render_string("<h1>[[ page.title ]]</h1>", &json!({ "title": "<b>" }), &mut RenderOptions::new())?;

	assert_eq!(output, "<h1><b></h1>");

	Ok(())
}

#[test]
fn missing_config_file_is_io_error() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let result = EngineConfig::load(tmp.path().join("absent.toml"));

	assert!(matches!(result, Err(QuillError::Io(_))));

	Ok(())
}

#[test]
fn invalid_config_file_is_parse_error() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let path = tmp.path().join("quill.toml");
	fs::write(&path, "auto_trim = \"yes\"")?;

	let result = EngineConfig::load(&path);
	assert!(matches!(result, Err(QuillError::ConfigParse(_))));

	Ok(())
}
