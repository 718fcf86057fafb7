//! Rendering of JSON-shaped templates.
//!
//! Request templates are usually JSON documents whose string values embed
//! references. Each string leaf is rendered on its own and the output is
//! coerced back into a JSON value.

use serde_json::{Map, Value};

use super::parser::has_template_syntax;
use super::{render, TemplateContext, TemplateError};

/// Maximum object nesting walked by [`render_template_object`].
pub const MAX_DEPTH: usize = 32;

/// Render every string leaf of `template`. Arrays and scalars are kept as-is.
pub fn render_template_object(
    template: &Value,
    context: &dyn TemplateContext,
) -> Result<Value, TemplateError> {
    render_node(template, context, 0)
}

/// Render template source. Sources that parse as a JSON object are walked
/// leaf by leaf, anything else is rendered whole and parsed as JSON when
/// possible.
pub fn render_template_source(
    source: &str,
    context: &dyn TemplateContext,
) -> Result<Value, TemplateError> {
    if let Ok(document @ Value::Object(_)) = serde_json::from_str::<Value>(source) {
        return render_template_object(&document, context);
    }
    let rendered = render(source, context)?;
    Ok(serde_json::from_str(&rendered).unwrap_or(Value::String(rendered)))
}

fn render_node(
    node: &Value,
    context: &dyn TemplateContext,
    depth: usize,
) -> Result<Value, TemplateError> {
    if depth > MAX_DEPTH {
        return Err(TemplateError::DepthExceeded(MAX_DEPTH));
    }
    match node {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                let rendered = match value {
                    Value::String(source) => render_leaf(source, context)?,
                    Value::Object(_) => render_node(value, context, depth + 1)?,
                    other => other.clone(),
                };
                out.insert(key.clone(), rendered);
            }
            Ok(Value::Object(out))
        }
        Value::String(source) => render_leaf(source, context),
        other => Ok(other.clone()),
    }
}

fn render_leaf(source: &str, context: &dyn TemplateContext) -> Result<Value, TemplateError> {
    if !has_template_syntax(source) {
        return Ok(Value::String(source.to_string()));
    }
    let rendered = render(source, context)?;
    // Nothing resolved: the gateway emits null rather than the raw template.
    if rendered == source {
        return Ok(Value::Null);
    }
    Ok(coerce(rendered))
}

fn coerce(rendered: String) -> Value {
    match rendered.as_str() {
        "undefined" | "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => match serde_json::from_str::<Value>(&rendered) {
            // Falsy parse results keep the rendered text.
            Ok(Value::Number(n)) if n.as_f64() == Some(0.0) => Value::String(rendered),
            Ok(Value::String(s)) if s.is_empty() => Value::String(rendered),
            Ok(Value::Null) | Err(_) => Value::String(rendered),
            Ok(parsed) => parsed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Map<String, Value> {
        match json!({
            "name": "ana",
            "count": 3,
            "flag": true,
            "obj": {"a": 1}
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_literal_strings_round_trip() {
        let template = json!({"a": "hello", "b": "123", "c": {"d": "plain text"}});
        let rendered = render_template_object(&template, &context()).unwrap();
        assert_eq!(rendered, template);
    }

    #[test]
    fn test_leaves_are_coerced() {
        let template = json!({
            "name": "$name",
            "count": "$count",
            "flag": "$flag",
            "obj": "$obj.a",
            "list": [1, "$name"],
            "nested": {"n": "hi $name"}
        });
        let rendered = render_template_object(&template, &context()).unwrap();
        assert_eq!(
            rendered,
            json!({
                "name": "ana",
                "count": 3,
                "flag": true,
                "obj": 1,
                "list": [1, "$name"],
                "nested": {"n": "hi ana"}
            })
        );
    }

    #[test]
    fn test_unresolved_leaf_becomes_null() {
        let template = json!({"missing": "$nothing.here"});
        let rendered = render_template_object(&template, &context()).unwrap();
        assert_eq!(rendered, json!({"missing": null}));
    }

    #[test]
    fn test_zero_keeps_rendered_text() {
        let template = json!({"zero": "#set($z = 0)$z"});
        let rendered = render_template_object(&template, &context()).unwrap();
        assert_eq!(rendered, json!({"zero": "0"}));
    }

    #[test]
    fn test_depth_guard() {
        let mut template = json!("$name");
        for _ in 0..40 {
            template = json!({ "x": template });
        }
        assert_eq!(
            render_template_object(&template, &context()).unwrap_err(),
            TemplateError::DepthExceeded(MAX_DEPTH)
        );
    }

    #[test]
    fn test_source_that_is_not_json_is_rendered_whole() {
        let source = "{\"name\": \"$name\", \"count\": $count}";
        let rendered = render_template_source(source, &context()).unwrap();
        assert_eq!(rendered, json!({"name": "ana", "count": 3}));
    }

    #[test]
    fn test_source_that_is_json_is_walked() {
        let source = r#"{"who": "$name"}"#;
        let rendered = render_template_source(source, &context()).unwrap();
        assert_eq!(rendered, json!({"who": "ana"}));
    }
}
