//! Stage information and environment overrides.
//!
//! The gateway historically read a handful of `SLS_*` variables (and
//! `PRINCIPAL_ID` / `AUTHORIZER`) while building every event. They are read
//! once at startup into [`EnvironmentOverrides`] and passed explicitly.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::config::GatewaySettings;

/// Placeholder values used when neither a header nor an override is present.
pub mod sentinel {
    pub const ACCOUNT_ID: &str = "offlineContext_accountId";
    pub const API_ID: &str = "offlineContext_apiId";
    pub const API_KEY: &str = "offlineContext_apiKey";
    pub const API_KEY_ID: &str = "offlineContext_apiKeyId";
    pub const CALLER: &str = "offlineContext_caller";
    pub const COGNITO_AUTHENTICATION_PROVIDER: &str = "offlineContext_cognitoAuthenticationProvider";
    pub const COGNITO_AUTHENTICATION_TYPE: &str = "offlineContext_cognitoAuthenticationType";
    pub const COGNITO_IDENTITY_ID: &str = "offlineContext_cognitoIdentityId";
    pub const COGNITO_IDENTITY_POOL_ID: &str = "offlineContext_cognitoIdentityPoolId";
    pub const PRINCIPAL_ID: &str = "offlineContext_authorizer_principalId";
    pub const RESOURCE_ID: &str = "offlineContext_resourceId";
    pub const USER: &str = "offlineContext_user";
    pub const USER_ARN: &str = "offlineContext_userArn";
    pub const DOMAIN_NAME: &str = "offlineContext_domainName";
    pub const DOMAIN_PREFIX: &str = "offlineContext_domainPrefix";
}

/// Values that replace event defaults, captured from the process environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentOverrides {
    pub principal_id: Option<String>,
    pub authorizer: Option<Map<String, Value>>,
    pub account_id: Option<String>,
    pub api_key: Option<String>,
    pub api_key_id: Option<String>,
    pub caller: Option<String>,
    pub cognito_authentication_provider: Option<String>,
    pub cognito_authentication_type: Option<String>,
    pub cognito_identity_id: Option<String>,
    pub cognito_identity_pool_id: Option<String>,
}

impl EnvironmentOverrides {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let authorizer = lookup("AUTHORIZER").and_then(|raw| {
            match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => Some(map),
                Ok(_) | Err(_) => {
                    tracing::error!(value = %raw, "Could not parse AUTHORIZER override as a JSON object");
                    None
                }
            }
        });
        Self {
            principal_id: lookup("PRINCIPAL_ID"),
            authorizer,
            account_id: lookup("SLS_ACCOUNT_ID"),
            api_key: lookup("SLS_API_KEY"),
            api_key_id: lookup("SLS_API_KEY_ID"),
            caller: lookup("SLS_CALLER"),
            cognito_authentication_provider: lookup("SLS_COGNITO_AUTHENTICATION_PROVIDER"),
            cognito_authentication_type: lookup("SLS_COGNITO_AUTHENTICATION_TYPE"),
            cognito_identity_id: lookup("SLS_COGNITO_IDENTITY_ID"),
            cognito_identity_pool_id: lookup("SLS_COGNITO_IDENTITY_POOL_ID"),
        }
    }
}

/// Deployment-wide values stamped into every event.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub region: String,
    pub variables: BTreeMap<String, String>,
    pub overrides: EnvironmentOverrides,
}

impl Stage {
    pub fn new(settings: &GatewaySettings, overrides: EnvironmentOverrides) -> Self {
        Self {
            name: settings.stage.clone(),
            region: settings.region.clone(),
            variables: settings.stage_variables.clone(),
            overrides,
        }
    }

    /// Stage variables as an event value (`null` when none are configured).
    pub fn variables_value(&self) -> Value {
        if self.variables.is_empty() {
            return Value::Null;
        }
        Value::Object(
            self.variables
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    /// Principal id used when no authorizer supplied one.
    pub fn default_principal_id(&self) -> String {
        self.overrides
            .principal_id
            .clone()
            .unwrap_or_else(|| sentinel::PRINCIPAL_ID.to_string())
    }
}
