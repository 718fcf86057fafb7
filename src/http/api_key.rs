//! API keys for private routes.

use axum::http::StatusCode;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;

use crate::auth::Credentials;
use crate::config::GatewaySettings;
use crate::events::snapshot::RequestSnapshot;
use crate::response::ResponseEnvelope;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Keys accepted on private routes.
#[derive(Debug, Clone)]
pub struct ApiKeys {
    keys: Vec<String>,
}

impl ApiKeys {
    /// Configured keys, or one generated key when none are configured.
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        let mut keys: Vec<String> = settings.api_keys.iter().filter(|k| !k.is_empty()).cloned().collect();
        if keys.is_empty() {
            let generated: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(40)
                .map(char::from)
                .collect();
            keys.push(generated);
        }
        for key in &keys {
            tracing::info!(key = %key, "API key accepted on private routes");
        }
        Self { keys }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// `x-api-key`, falling back to the authorizer's usage identifier key.
    pub fn is_allowed(&self, request: &RequestSnapshot, credentials: Option<&Credentials>) -> bool {
        let presented = request.header(API_KEY_HEADER).filter(|k| self.contains(k)).is_some();
        presented
            || credentials
                .and_then(|c| c.usage_identifier_key.as_deref())
                .is_some_and(|k| self.contains(k))
    }

    fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

/// Reply for a private route called without a valid key.
pub fn forbidden() -> ResponseEnvelope {
    let mut envelope = ResponseEnvelope::json(StatusCode::FORBIDDEN, &json!({"message": "Forbidden"}));
    envelope.append_header("x-amzn-ErrorType", "ForbiddenException");
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::snapshot::tests::snapshot;
    use crate::response::ResponseBody;
    use axum::http::Method;
    use serde_json::Map;

    fn keys() -> ApiKeys {
        ApiKeys::from_settings(&GatewaySettings {
            api_keys: vec!["secret".into()],
            ..Default::default()
        })
    }

    #[test]
    fn test_generated_key_when_none_configured() {
        let keys = ApiKeys::from_settings(&GatewaySettings::default());
        assert_eq!(keys.keys().len(), 1);
        assert_eq!(keys.keys()[0].len(), 40);
    }

    #[test]
    fn test_header_and_usage_key() {
        let keys = keys();
        let good = snapshot(Method::GET, "/dev/p", "", &[("x-api-key", "secret")], "");
        let bad = snapshot(Method::GET, "/dev/p", "", &[("x-api-key", "nope")], "");
        assert!(keys.is_allowed(&good, None));
        assert!(!keys.is_allowed(&bad, None));

        let mut credentials = Credentials::from_custom(Some("u".into()), Map::new());
        credentials.usage_identifier_key = Some("secret".into());
        assert!(keys.is_allowed(&bad, Some(&credentials)));
    }

    #[test]
    fn test_forbidden_shape() {
        let envelope = forbidden();
        assert_eq!(envelope.status, StatusCode::FORBIDDEN);
        assert_eq!(envelope.header("x-amzn-errortype"), Some("ForbiddenException"));
        assert_eq!(envelope.body, ResponseBody::Text(r#"{"message":"Forbidden"}"#.into()));
    }
}
