//! Method and path template matching.
//!
//! # Responsibilities
//! - Parse path templates (`/users/{id}`, greedy `/{proxy+}`)
//! - Match request paths and extract decoded path parameters
//! - Score matches so the most specific template wins
//!
//! # Design Decisions
//! - Literal segments beat parameters, parameters beat greedy segments,
//!   compared position by position over the request path
//! - Trailing slashes and empty segments are ignored on both sides
//! - Literal comparison is case-sensitive

use std::collections::BTreeMap;

use axum::http::Method;

/// Method a route answers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMethod {
    Any,
    Exact(Method),
}

impl RouteMethod {
    /// Parse `ANY` or an HTTP method name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        let upper = value.trim().to_ascii_uppercase();
        if upper == "ANY" || upper == "*" {
            return Some(Self::Any);
        }
        Method::from_bytes(upper.as_bytes()).ok().map(Self::Exact)
    }

    /// HEAD requests are answered by GET routes.
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == method || (*expected == Method::GET && *method == Method::HEAD),
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Any => "ANY",
            Self::Exact(method) => method.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Greedy(String),
}

/// Parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

/// Successful path match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub parameters: BTreeMap<String, String>,
    /// Per request segment: 3 literal, 2 parameter, 1 greedy.
    pub score: Vec<u8>,
}

impl PathTemplate {
    pub fn parse(path: &str) -> Result<Self, String> {
        let trimmed = path.trim();
        if !trimmed.starts_with('/') {
            return Err(format!("path '{path}' must start with '/'"));
        }

        let raw: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, segment) in raw.iter().enumerate() {
            let parsed = match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(inner) => match inner.strip_suffix('+').or_else(|| inner.strip_suffix('*')) {
                    Some(name) => {
                        if i + 1 != raw.len() {
                            return Err(format!("greedy parameter in '{path}' must be the last segment"));
                        }
                        Segment::Greedy(name.to_string())
                    }
                    None => Segment::Param(inner.to_string()),
                },
                None if segment.contains(['{', '}']) => {
                    return Err(format!("unsupported segment '{segment}' in '{path}'"));
                }
                None => Segment::Literal(segment.to_string()),
            };
            if matches!(&parsed, Segment::Param(n) | Segment::Greedy(n) if n.is_empty()) {
                return Err(format!("empty parameter name in '{path}'"));
            }
            segments.push(parsed);
        }

        let source = if raw.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", raw.join("/"))
        };
        Ok(Self { source, segments })
    }

    /// Normalized template text, e.g. `/users/{id}`.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn has_greedy(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Greedy(_)))
    }

    /// Match `path` against the template.
    pub fn match_path(&self, path: &str) -> Option<PathMatch> {
        let request: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut parameters = BTreeMap::new();
        let mut score = Vec::with_capacity(request.len());

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(expected) => {
                    if request.get(i) != Some(&expected.as_str()) {
                        return None;
                    }
                    score.push(3);
                }
                Segment::Param(name) => {
                    let value = request.get(i)?;
                    parameters.insert(name.clone(), decode(value));
                    score.push(2);
                }
                Segment::Greedy(name) => {
                    let rest = request.get(i..).unwrap_or_default();
                    if !rest.is_empty() {
                        parameters.insert(name.clone(), decode(&rest.join("/")));
                    }
                    score.extend(std::iter::repeat(1).take(rest.len()));
                    return Some(PathMatch { parameters, score });
                }
            }
        }

        (request.len() == self.segments.len()).then_some(PathMatch { parameters, score })
    }
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(template: &str, path: &str) -> Option<BTreeMap<String, String>> {
        PathTemplate::parse(template).unwrap().match_path(path).map(|m| m.parameters)
    }

    #[test]
    fn test_route_method() {
        assert_eq!(RouteMethod::parse("any"), Some(RouteMethod::Any));
        let get = RouteMethod::parse("get").unwrap();
        assert!(get.matches(&Method::GET));
        assert!(get.matches(&Method::HEAD));
        assert!(!get.matches(&Method::POST));
        assert!(RouteMethod::Any.matches(&Method::DELETE));
        assert!(RouteMethod::parse("not a method").is_none());
    }

    #[test]
    fn test_literal_and_param_paths() {
        assert_eq!(params("/users", "/users/"), Some(BTreeMap::new()));
        let p = params("/users/{id}/posts/{post}", "/users/7/posts/a%20b").unwrap();
        assert_eq!(p["id"], "7");
        assert_eq!(p["post"], "a b");
        assert!(params("/users/{id}", "/users").is_none());
        assert!(params("/users/{id}", "/users/7/extra").is_none());
        assert!(params("/Users", "/users").is_none());
    }

    #[test]
    fn test_greedy_paths() {
        let p = params("/files/{proxy+}", "/files/a/b/c.txt").unwrap();
        assert_eq!(p["proxy"], "a/b/c.txt");
        assert_eq!(params("/files/{proxy+}", "/files"), Some(BTreeMap::new()));
        assert!(params("/files/{proxy+}", "/other/a").is_none());
    }

    #[test]
    fn test_specificity_scores() {
        let literal = PathTemplate::parse("/users/me").unwrap();
        let param = PathTemplate::parse("/users/{id}").unwrap();
        let greedy = PathTemplate::parse("/{proxy+}").unwrap();
        let path = "/users/me";
        let a = literal.match_path(path).unwrap().score;
        let b = param.match_path(path).unwrap().score;
        let c = greedy.match_path(path).unwrap().score;
        assert!(a > b && b > c);
    }

    #[test]
    fn test_invalid_templates() {
        assert!(PathTemplate::parse("users").is_err());
        assert!(PathTemplate::parse("/{proxy+}/tail").is_err());
        assert!(PathTemplate::parse("/a{b}").is_err());
        assert!(PathTemplate::parse("/{}").is_err());
        assert_eq!(PathTemplate::parse("/a/b/").unwrap().as_str(), "/a/b");
        assert_eq!(PathTemplate::parse("/").unwrap().as_str(), "/");
    }
}
