//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the most specific route for a method and path
//! - Report registered routes for the not-found reply
//!
//! # Design Decisions
//! - Immutable after construction (shared without locks)
//! - O(n) scan with specificity scoring; route counts are small
//! - Routes that fail to compile are logged and skipped, never fatal

use std::sync::Arc;

use axum::http::Method;

use super::route::{RouteDefinition, RoutePath};
use super::RouteMatch;
use crate::config::{ApiKind, GatewayConfig};

/// All HTTP routes served by the gateway.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<RouteDefinition>>,
    stage: String,
    prepend_stage: bool,
}

impl RouteTable {
    /// Compile the routes from configuration.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut table = Self {
            routes: Vec::with_capacity(config.routes.len()),
            stage: config.gateway.stage.clone(),
            prepend_stage: !config.gateway.no_prepend_stage_in_url,
        };

        for route in &config.routes {
            if route.method.eq_ignore_ascii_case("HEAD") {
                tracing::info!(path = %route.path, "HEAD route skipped, GET routes answer HEAD requests");
                continue;
            }
            match RouteDefinition::from_config(route, &config.authorizers, &config.gateway) {
                Ok(definition) => {
                    tracing::info!(
                        method = %definition.method.as_str(),
                        path = %table.public_path(&definition),
                        function = %definition.function,
                        authorizer = definition.authorizer.name().unwrap_or("none"),
                        "Route registered"
                    );
                    table.routes.push(Arc::new(definition));
                }
                Err(e) => {
                    tracing::error!(
                        method = %route.method,
                        path = %route.path,
                        error = %e,
                        "Route skipped"
                    );
                }
            }
        }
        table
    }

    pub fn routes(&self) -> &[Arc<RouteDefinition>] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// True when at least one route answers `OPTIONS` for this path.
    pub fn has_options_route(&self, path: &str) -> bool {
        self.match_request(&Method::OPTIONS, path)
            .is_some_and(|m| m.route.method.is_exact())
    }

    /// Path a route is reachable under, stage prefix included.
    pub fn public_path(&self, route: &RouteDefinition) -> String {
        match &route.path {
            RoutePath::Default => "/{default*}".to_string(),
            RoutePath::Template(template) if self.stage_prefixed(route) => {
                if template.as_str() == "/" {
                    format!("/{}", self.stage)
                } else {
                    format!("/{}{}", self.stage, template.as_str())
                }
            }
            RoutePath::Template(template) => template.as_str().to_string(),
        }
    }

    fn stage_prefixed(&self, route: &RouteDefinition) -> bool {
        route.api == ApiKind::Rest && self.prepend_stage
    }

    fn strip_stage<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix('/')?.strip_prefix(self.stage.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    /// Most specific route for `method` and `path`.
    pub fn match_request(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let stripped = self.strip_stage(path);
        let mut best: Option<(Vec<u8>, bool, bool, RouteMatch)> = None;

        for route in &self.routes {
            if !route.method.matches(method) {
                continue;
            }
            let request_path = if self.stage_prefixed(route) {
                match stripped {
                    Some(p) => p,
                    None => continue,
                }
            } else {
                path
            };

            let (parameters, score, greedy) = match &route.path {
                RoutePath::Template(template) => match template.match_path(request_path) {
                    Some(m) => (m.parameters, m.score, template.has_greedy()),
                    None => continue,
                },
                RoutePath::Default => (Default::default(), Vec::new(), true),
            };

            let candidate = (score, !greedy, route.method.is_exact());
            let better = best
                .as_ref()
                .map_or(true, |(s, g, e, _)| candidate > (s.clone(), *g, *e));
            if better {
                best = Some((
                    candidate.0,
                    candidate.1,
                    candidate.2,
                    RouteMatch {
                        route: route.clone(),
                        path_parameters: parameters,
                        request_path: request_path.to_string(),
                    },
                ));
            }
        }

        best.map(|(_, _, _, m)| m)
    }

    /// Routes as `method - path`, sorted by path, for the not-found reply.
    pub fn describe(&self) -> Vec<String> {
        let mut entries: Vec<(String, String)> = self
            .routes
            .iter()
            .map(|r| (self.public_path(r), r.method.as_str().to_ascii_lowercase()))
            .collect();
        entries.sort();
        entries
            .into_iter()
            .map(|(path, method)| {
                let method = if method == "any" { "*".to_string() } else { method };
                format!("{method} - {path}")
            })
            .collect()
    }
}
