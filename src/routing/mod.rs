//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → route.rs (method, path template, integration, authorizer,
//!       templates, schemas, responses)
//!     → router.rs (RouteTable, immutable)
//!
//! Incoming Request (method, path):
//!     → router.rs (strip stage prefix for REST routes)
//!     → matcher.rs (score every candidate template)
//!     → Return: RouteMatch or None
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Deterministic: same input always matches same route; ties go to the
//!   route declared first
//! - Literal > parameter > greedy precedence, exact method over `ANY`

pub mod matcher;
pub mod route;
pub mod router;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use matcher::{PathTemplate, RouteMethod};
pub use route::{
    ContentHandling, IntegrationKind, ResponseDescriptor, RouteDefinition, RouteError, RoutePath,
};
pub use router::RouteTable;

/// A route selected for a request.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<RouteDefinition>,
    /// Decoded path parameters.
    pub path_parameters: BTreeMap<String, String>,
    /// Request path with the stage prefix removed (REST routes).
    pub request_path: String,
}

impl RouteMatch {
    /// Resource path used in method ARNs: the route template, or the
    /// request path for `$default` routes.
    pub fn arn_resource(&self) -> &str {
        match self.route.path {
            RoutePath::Template(ref template) => template.as_str(),
            RoutePath::Default => &self.request_path,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{GatewaySettings, RouteConfig};
    use crate::events::snapshot::RequestSnapshot;

    /// Match `request` against a single REST route, stage `dev`.
    pub fn route_match(method: &str, path: &str, request: &RequestSnapshot) -> RouteMatch {
        route_match_with(
            RouteConfig {
                function: "handler".into(),
                method: method.into(),
                path: path.into(),
                ..Default::default()
            },
            request,
        )
    }

    /// Match `request` against the route built from `config`.
    pub fn route_match_with(config: RouteConfig, request: &RequestSnapshot) -> RouteMatch {
        let route = Arc::new(
            RouteDefinition::from_config(&config, &BTreeMap::new(), &GatewaySettings::default()).unwrap(),
        );
        let request_path = match route.api {
            crate::config::ApiKind::Rest => request
                .path
                .strip_prefix("/dev")
                .filter(|p| p.is_empty() || p.starts_with('/'))
                .map(|p| if p.is_empty() { "/" } else { p })
                .unwrap_or(&request.path)
                .to_string(),
            crate::config::ApiKind::Http => request.path.clone(),
        };
        let path_parameters = match &route.path {
            RoutePath::Template(template) => template
                .match_path(&request_path)
                .map(|m| m.parameters)
                .unwrap_or_default(),
            RoutePath::Default => BTreeMap::new(),
        };
        RouteMatch {
            route,
            path_parameters,
            request_path,
        }
    }

    #[test]
    fn test_arn_resource() {
        let request = crate::events::snapshot::tests::snapshot(
            axum::http::Method::GET,
            "/dev/users/1",
            "",
            &[],
            "",
        );
        let matched = route_match("GET", "/users/{id}", &request);
        assert_eq!(matched.arn_resource(), "/users/{id}");
        assert_eq!(matched.request_path, "/users/1");
    }
}
