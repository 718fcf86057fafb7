//! `$util` helpers exposed to mapping templates.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde_json::Value;

use crate::template::{stringify, TemplateError};

/// Dispatch `$util.<method>(args)`.
pub fn call(method: &str, args: &[Value]) -> Option<Result<Value, TemplateError>> {
    let input = args.first().map(stringify).unwrap_or_default();
    let result = match method {
        "escapeJavaScript" => Ok(Value::String(escape_javascript(&input))),
        "base64Encode" => Ok(Value::String(STANDARD.encode(input.as_bytes()))),
        "base64Decode" => base64_decode(&input).map(Value::String),
        "parseJson" => serde_json::from_str(&input).map_err(|e| TemplateError::Function {
            name: "parseJson".into(),
            message: e.to_string(),
        }),
        "urlEncode" => Ok(Value::String(urlencoding::encode(&input).into_owned())),
        "urlDecode" => Ok(Value::String(url_decode(&input))),
        _ => return None,
    };
    Some(result)
}

/// Escape a string for embedding in a JavaScript/JSON string literal.
pub fn escape_javascript(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode standard or URL-safe base64, padded or not.
pub fn base64_decode(input: &str) -> Result<String, TemplateError> {
    let trimmed = input.trim();
    let bytes = STANDARD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed.trim_end_matches('=')))
        .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed.trim_end_matches('=')))
        .map_err(|e| TemplateError::Function {
            name: "base64Decode".into(),
            message: e.to_string(),
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Decode a form/URL encoded string; `+` is a space.
pub fn url_decode(input: &str) -> String {
    let spaced = input.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}
