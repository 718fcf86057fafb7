//! Built-in methods available on template values.
//!
//! Mirrors the Java `String`, `Map` and `List` methods mapping templates are
//! written against. Unknown methods resolve to undefined.

use regex::Regex;
use serde_json::{Map, Value};

use super::render::{loose_eq, stringify};
use super::TemplateError;

/// Call `name(args)` on `value`.
pub fn call(value: &Value, name: &str, args: &[Value]) -> Result<Option<Value>, TemplateError> {
    if name == "toString" {
        return Ok(Some(Value::String(stringify(value))));
    }
    if name == "equals" {
        return Ok(arg(args, 0).map(|other| Value::Bool(loose_eq(value, other) && same_kind(value, other))));
    }
    match value {
        Value::String(s) => string_method(s, name, args),
        Value::Object(map) => Ok(map_method(map, name, args)),
        Value::Array(items) => Ok(list_method(items, name, args)),
        _ => Ok(None),
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn arg(args: &[Value], i: usize) -> Option<&Value> {
    args.get(i)
}

fn str_arg(args: &[Value], i: usize) -> Option<String> {
    args.get(i).map(stringify)
}

fn int_arg(args: &[Value], i: usize) -> Option<i64> {
    match args.get(i)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn compile(method: &str, pattern: &str) -> Result<Regex, TemplateError> {
    Regex::new(pattern).map_err(|e| TemplateError::Function {
        name: method.to_string(),
        message: e.to_string(),
    })
}

/// Java replacement strings use `$1`; the regex crate needs `${1}` when a
/// group number is followed by other word characters.
fn java_replacement(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    if next == '$' {
                        out.push_str("$$");
                    } else {
                        out.push(next);
                    }
                }
            }
            '$' if chars.peek().is_some_and(|d| d.is_ascii_digit()) => {
                out.push_str("${");
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    out.push(d);
                    chars.next();
                }
                out.push('}');
            }
            _ => out.push(c),
        }
    }
    out
}

fn char_slice(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

fn char_index_of(haystack: &str, needle: &str, last: bool) -> i64 {
    let found = if last {
        haystack.rfind(needle)
    } else {
        haystack.find(needle)
    };
    found
        .map(|byte| haystack[..byte].chars().count() as i64)
        .unwrap_or(-1)
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Result<Option<Value>, TemplateError> {
    let len = s.chars().count();
    let value = match name {
        "length" | "size" => Value::from(len),
        "isEmpty" => Value::Bool(s.is_empty()),
        "trim" => Value::String(s.trim().to_string()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "toUpperCase" => Value::String(s.to_uppercase()),
        "contains" => match str_arg(args, 0) {
            Some(needle) => Value::Bool(s.contains(&needle)),
            None => return Ok(None),
        },
        "equalsIgnoreCase" => match arg(args, 0) {
            Some(Value::String(other)) => Value::Bool(s.to_lowercase() == other.to_lowercase()),
            Some(_) => Value::Bool(false),
            None => return Ok(None),
        },
        "startsWith" => match str_arg(args, 0) {
            Some(prefix) => {
                let offset = int_arg(args, 1).unwrap_or(0).max(0) as usize;
                Value::Bool(char_slice(s, offset, len).starts_with(&prefix))
            }
            None => return Ok(None),
        },
        "endsWith" => match str_arg(args, 0) {
            Some(suffix) => Value::Bool(s.ends_with(&suffix)),
            None => return Ok(None),
        },
        "indexOf" => match str_arg(args, 0) {
            Some(needle) => Value::from(char_index_of(s, &needle, false)),
            None => return Ok(None),
        },
        "lastIndexOf" => match str_arg(args, 0) {
            Some(needle) => Value::from(char_index_of(s, &needle, true)),
            None => return Ok(None),
        },
        "charAt" => match int_arg(args, 0).and_then(|i| s.chars().nth(i.max(0) as usize)) {
            Some(c) => Value::String(c.to_string()),
            None => return Ok(None),
        },
        "substring" => {
            let Some(start) = int_arg(args, 0) else {
                return Ok(None);
            };
            let end = int_arg(args, 1).unwrap_or(len as i64);
            let start = start.clamp(0, len as i64) as usize;
            let end = end.clamp(0, len as i64) as usize;
            Value::String(char_slice(s, start.min(end), start.max(end)))
        }
        "concat" => match str_arg(args, 0) {
            Some(tail) => Value::String(format!("{s}{tail}")),
            None => return Ok(None),
        },
        "replace" => match (str_arg(args, 0), str_arg(args, 1)) {
            (Some(from), Some(to)) => Value::String(s.replace(&from, &to)),
            _ => return Ok(None),
        },
        "replaceAll" | "replaceFirst" => {
            let (Some(pattern), Some(replacement)) = (str_arg(args, 0), str_arg(args, 1)) else {
                return Ok(None);
            };
            let re = compile(name, &pattern)?;
            let replacement = java_replacement(&replacement);
            let replaced = if name == "replaceAll" {
                re.replace_all(s, replacement.as_str())
            } else {
                re.replace(s, replacement.as_str())
            };
            Value::String(replaced.into_owned())
        }
        "matches" => {
            let Some(pattern) = str_arg(args, 0) else {
                return Ok(None);
            };
            let re = compile(name, &format!("^(?:{pattern})$"))?;
            Value::Bool(re.is_match(s))
        }
        "split" => {
            let Some(pattern) = str_arg(args, 0) else {
                return Ok(None);
            };
            let re = compile(name, &pattern)?;
            let mut parts: Vec<&str> = re.split(s).collect();
            while parts.len() > 1 && parts.last().is_some_and(|p| p.is_empty()) {
                parts.pop();
            }
            Value::Array(parts.into_iter().map(|p| Value::String(p.into())).collect())
        }
        "regionMatches" => match region_matches(s, args) {
            Some(matched) => Value::Bool(matched),
            None => return Ok(None),
        },
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// `regionMatches([ignoreCase,] toffset, other, ooffset, len)`.
fn region_matches(s: &str, args: &[Value]) -> Option<bool> {
    let (ignore_case, rest) = match args.first() {
        Some(Value::Bool(b)) => (*b, &args[1..]),
        _ => (false, args),
    };
    let toffset = int_arg(rest, 0)?;
    let other = str_arg(rest, 1)?;
    let ooffset = int_arg(rest, 2)?;
    let len = int_arg(rest, 3)?;
    if toffset < 0 || ooffset < 0 {
        return Some(false);
    }
    let (toffset, ooffset) = (toffset as usize, ooffset as usize);
    if len <= 0 {
        return Some(true);
    }
    let len = len as usize;
    if toffset + len > s.chars().count() || ooffset + len > other.chars().count() {
        return Some(false);
    }
    let left = char_slice(s, toffset, toffset + len);
    let right = char_slice(&other, ooffset, ooffset + len);
    Some(if ignore_case {
        left.to_lowercase() == right.to_lowercase()
    } else {
        left == right
    })
}

fn map_method(map: &Map<String, Value>, name: &str, args: &[Value]) -> Option<Value> {
    let value = match name {
        "keySet" => Value::Array(map.keys().cloned().map(Value::String).collect()),
        "values" => Value::Array(map.values().cloned().collect()),
        "entrySet" => Value::Array(
            map.iter()
                .map(|(k, v)| {
                    let mut entry = Map::new();
                    entry.insert("key".into(), Value::String(k.clone()));
                    entry.insert("value".into(), v.clone());
                    Value::Object(entry)
                })
                .collect(),
        ),
        "get" => return map.get(&str_arg(args, 0)?).cloned(),
        "containsKey" => Value::Bool(map.contains_key(&str_arg(args, 0)?)),
        "size" => Value::from(map.len()),
        "isEmpty" => Value::Bool(map.is_empty()),
        _ => return None,
    };
    Some(value)
}

fn list_method(items: &[Value], name: &str, args: &[Value]) -> Option<Value> {
    let value = match name {
        "size" => Value::from(items.len()),
        "isEmpty" => Value::Bool(items.is_empty()),
        "get" => return items.get(usize::try_from(int_arg(args, 0)?).ok()?).cloned(),
        "contains" => {
            let needle = arg(args, 0)?;
            Value::Bool(items.iter().any(|item| loose_eq(item, needle)))
        }
        _ => return None,
    };
    Some(value)
}
