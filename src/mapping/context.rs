//! Template context built from a request.

use serde_json::{json, Map, Value};

use super::{json_path, util};
use crate::auth::Credentials;
use crate::events::identity::{bearer_claims, new_request_id, request_identity};
use crate::events::overrides::{sentinel, Stage};
use crate::events::snapshot::RequestSnapshot;
use crate::routing::RouteMatch;
use crate::template::{TemplateContext, TemplateError};

/// Namespaces visible to request and response templates:
/// `$context`, `$input`, `$util` and `$stageVariables`.
#[derive(Debug, Clone)]
pub struct MappingContext {
    context: Value,
    stage_variables: Value,
    body: Value,
    headers: Map<String, Value>,
    path: Map<String, Value>,
    querystring: Map<String, Value>,
}

impl MappingContext {
    /// The `$context` object.
    pub fn context(&self) -> &Value {
        &self.context
    }

    fn params(&self) -> Value {
        json!({
            "header": self.headers,
            "path": self.path,
            "querystring": self.querystring,
        })
    }

    fn param(&self, name: &str) -> Value {
        self.path
            .get(name)
            .or_else(|| self.querystring.get(name))
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .cloned()
            .unwrap_or(Value::Null)
    }
}

impl TemplateContext for MappingContext {
    fn lookup(&self, name: &str) -> Option<Value> {
        match name {
            "context" => Some(self.context.clone()),
            "stageVariables" => Some(self.stage_variables.clone()),
            "input" => Some(json!({ "body": self.body })),
            _ => None,
        }
    }

    fn call(&self, namespace: &str, method: &str, args: &[Value]) -> Option<Result<Value, TemplateError>> {
        let path = || args.first().and_then(Value::as_str).unwrap_or("$");
        match (namespace, method) {
            ("input", "path") => Some(Ok(json_path::query(&self.body, path()).unwrap_or(Value::Null))),
            ("input", "json") => Some(Ok(json_path::query(&self.body, path())
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null))),
            ("input", "params") => Some(Ok(match args.first() {
                Some(name) => self.param(&crate::template::stringify(name)),
                None => self.params(),
            })),
            ("util", method) => util::call(method, args),
            _ => None,
        }
    }
}

/// Assembles a [`MappingContext`] from the request and what is known about
/// it at the point of rendering.
pub struct MappingContextBuilder<'a> {
    request: &'a RequestSnapshot,
    stage: &'a Stage,
    route: Option<&'a RouteMatch>,
    credentials: Option<&'a Credentials>,
    payload: Value,
}

impl<'a> MappingContextBuilder<'a> {
    pub fn new(request: &'a RequestSnapshot, stage: &'a Stage) -> Self {
        Self {
            request,
            stage,
            route: None,
            credentials: None,
            payload: Value::Null,
        }
    }

    pub fn route(mut self, route: &'a RouteMatch) -> Self {
        self.route = Some(route);
        self
    }

    pub fn credentials(mut self, credentials: Option<&'a Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Value exposed as `$input.body` and queried by `$input.path/json`.
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> MappingContext {
        let authorizer = match &self.stage.overrides.authorizer {
            Some(map) => Value::Object(map.clone()),
            None => {
                let mut authorizer = self
                    .credentials
                    .map(Credentials::authorizer_map)
                    .unwrap_or_default();
                let principal_id = self
                    .credentials
                    .and_then(|c| c.principal_id.clone())
                    .unwrap_or_else(|| self.stage.default_principal_id());
                authorizer.insert("principalId".into(), Value::String(principal_id));
                if let Some(claims) = bearer_claims(self.request) {
                    authorizer.insert("claims".into(), claims);
                }
                Value::Object(authorizer)
            }
        };

        let resource_path = self
            .route
            .map(|m| m.route.resource_path().to_string())
            .unwrap_or_else(|| self.request.path.clone());

        let context = json!({
            "apiId": sentinel::API_ID,
            "authorizer": authorizer,
            "httpMethod": self.request.method.as_str(),
            "identity": request_identity(self.request, &self.stage.overrides),
            "requestId": new_request_id(),
            "resourceId": sentinel::RESOURCE_ID,
            "resourcePath": resource_path,
            "stage": self.stage.name,
        });

        let path = self
            .route
            .map(|m| {
                m.path_parameters
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect()
            })
            .unwrap_or_default();

        MappingContext {
            context,
            stage_variables: Value::Object(
                self.stage
                    .variables
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
            body: self.payload,
            headers: self.request.single_value_headers(),
            path,
            querystring: self.request.single_value_query().unwrap_or_default(),
        }
    }
}
