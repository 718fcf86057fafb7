//! Events for mapping-template (non proxy) integrations.

use serde_json::Value;

use super::{EventInput, SynthesisError};
use crate::mapping::MappingContextBuilder;
use crate::template::render_template_source;

/// Request template installed for `application/json` when a route
/// configures none.
pub const DEFAULT_REQUEST_TEMPLATE: &str = r#"#define( $loop )
  {
  #foreach( $key in $map.keySet() )
    #set( $k = $util.escapeJavaScript($key) )
    #set( $v = $util.escapeJavaScript($map.get($key)).replaceAll("\\'", "'") )
    "$k": "$v"
    #if( $foreach.hasNext ) , #end
  #end
  }
#end
{
  "body": $input.json('$'),
  "method": "$context.httpMethod",
  "principalId": "$context.authorizer.principalId",
  "stage": "$context.stage",

  "cognitoPoolClaims": {
    "sub": "$context.authorizer.claims.sub"
  },

  #set( $map = $context.authorizer )
  "enhancedAuthContext": $loop,

  #set( $map = $input.params().header )
  "headers": $loop,

  #set( $map = $input.params().querystring )
  "query": $loop,

  #set( $map = $input.params().path )
  "path": $loop,

  #set( $map = $context.identity )
  "identity": $loop,

  #set( $map = $stageVariables )
  "stageVariables": $loop,

  "requestPath": "$context.resourcePath"
}
"#;

/// Build a template integration event.
///
/// The request media type (default `application/json`) selects the
/// template. Without a template for it, a structured payload is passed
/// through and anything else becomes `{}`.
pub fn create(input: &EventInput<'_>) -> Result<Value, SynthesisError> {
    let route = &input.route.route;
    let content_type = input
        .request
        .media_type()
        .unwrap_or_else(|| "application/json".to_string());

    let mut event = match route.request_templates.get(&content_type) {
        Some(template) => {
            let payload = match input.payload {
                Value::Null => Value::Object(Default::default()),
                other => other.clone(),
            };
            let context = MappingContextBuilder::new(input.request, input.stage)
                .route(input.route)
                .credentials(input.credentials)
                .payload(payload)
                .build();
            tracing::debug!(content_type = %content_type, "Rendering request template");
            render_template_source(template, &context).map_err(|source| SynthesisError::Template {
                content_type: content_type.clone(),
                function: route.function.clone(),
                source,
            })?
        }
        None => match input.payload {
            structured @ (Value::Object(_) | Value::Array(_)) => structured.clone(),
            _ => Value::Object(Default::default()),
        },
    };

    if let Value::Object(map) = &mut event {
        map.insert("isOffline".into(), Value::Bool(true));
        map.insert("stageVariables".into(), input.stage.variables_value());
    }
    Ok(event)
}
