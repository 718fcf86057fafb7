//! JSONPath subset used by `$input.path`, `$input.json` and response
//! parameter mappings.
//!
//! Supported: `$`, `$.a.b`, `$['a']`, `$["a"]`, `$.list[0]`, `$.list[-1]`,
//! `$.list[*].name`. Paths without the leading `$` are read relative to the
//! root.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(i64),
    Wildcard,
}

fn parse(path: &str) -> Option<Vec<Segment>> {
    let path = path.trim();
    let rest = path.strip_prefix('$').unwrap_or(path);
    let chars: Vec<char> = rest.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;

    if i < chars.len() && chars[i] != '.' && chars[i] != '[' {
        let start = i;
        while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
            i += 1;
        }
        segments.push(Segment::Key(chars[start..i].iter().collect()));
    }

    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                let key: String = chars[start..i].iter().collect();
                match key.as_str() {
                    "" => return None,
                    "*" => segments.push(Segment::Wildcard),
                    _ => segments.push(Segment::Key(key)),
                }
            }
            '[' => {
                i += 1;
                let start = i;
                let quote = matches!(chars.get(i), Some('\'') | Some('"')).then(|| chars[i]);
                if let Some(q) = quote {
                    i += 1;
                    let key_start = i;
                    while i < chars.len() && chars[i] != q {
                        i += 1;
                    }
                    let key: String = chars[key_start..i].iter().collect();
                    i += 1;
                    if chars.get(i) != Some(&']') {
                        return None;
                    }
                    i += 1;
                    segments.push(Segment::Key(key));
                    continue;
                }
                while i < chars.len() && chars[i] != ']' {
                    i += 1;
                }
                if i >= chars.len() {
                    return None;
                }
                let inner: String = chars[start..i].iter().collect();
                i += 1;
                let inner = inner.trim();
                if inner == "*" {
                    segments.push(Segment::Wildcard);
                } else {
                    segments.push(Segment::Index(inner.parse().ok()?));
                }
            }
            _ => return None,
        }
    }
    Some(segments)
}

/// Evaluate `path` against `document`. Missing values yield `None`;
/// wildcards collect matches into an array.
pub fn query(document: &Value, path: &str) -> Option<Value> {
    let segments = parse(path)?;
    let mut current: Vec<&Value> = vec![document];
    let mut collected = false;

    for segment in &segments {
        let mut next = Vec::new();
        for value in current {
            match (segment, value) {
                (Segment::Key(key), Value::Object(map)) => next.extend(map.get(key)),
                (Segment::Index(i), Value::Array(items)) => {
                    let idx = if *i < 0 { items.len() as i64 + i } else { *i };
                    if let Some(item) = usize::try_from(idx).ok().and_then(|idx| items.get(idx)) {
                        next.push(item);
                    }
                }
                (Segment::Wildcard, Value::Array(items)) => next.extend(items.iter()),
                (Segment::Wildcard, Value::Object(map)) => next.extend(map.values()),
                _ => {}
            }
        }
        if matches!(segment, Segment::Wildcard) {
            collected = true;
        }
        current = next;
    }

    if collected {
        Some(Value::Array(current.into_iter().cloned().collect()))
    } else {
        current.first().map(|v| (*v).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "a": {"b": 1, "c d": [10, 20, 30]},
            "items": [{"name": "x"}, {"name": "y"}]
        })
    }

    #[test]
    fn test_root_and_keys() {
        assert_eq!(query(&doc(), "$"), Some(doc()));
        assert_eq!(query(&doc(), "$.a.b"), Some(json!(1)));
        assert_eq!(query(&doc(), "a.b"), Some(json!(1)));
        assert_eq!(query(&doc(), "$.a.missing"), None);
    }

    #[test]
    fn test_brackets_and_indexes() {
        assert_eq!(query(&doc(), "$.a['c d'][1]"), Some(json!(20)));
        assert_eq!(query(&doc(), "$.a[\"c d\"][-1]"), Some(json!(30)));
        assert_eq!(query(&doc(), "$.items[5]"), None);
    }

    #[test]
    fn test_wildcards() {
        assert_eq!(query(&doc(), "$.items[*].name"), Some(json!(["x", "y"])));
        assert_eq!(query(&doc(), "$.items.*.name"), Some(json!(["x", "y"])));
    }

    #[test]
    fn test_malformed_paths() {
        assert_eq!(query(&doc(), "$..a"), None);
        assert_eq!(query(&doc(), "$.items[abc]"), None);
    }
}
