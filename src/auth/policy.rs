//! IAM policy evaluation for custom authorizer responses.
//!
//! # Responsibilities
//! - Decide whether a policy document allows `execute-api:Invoke` on a
//!   method ARN
//!
//! # Design Decisions
//! - Any matching `Deny` wins over every `Allow`
//! - Resource globs are matched per ARN component so `*` in the region
//!   cannot swallow the account or API id
//! - Pure function of its inputs

use regex::Regex;
use serde_json::Value;

const INVOKE_ACTION: &str = "execute-api:Invoke";

/// True when `policy` allows invoking `method_arn`.
pub fn can_execute(policy: &Value, method_arn: &str) -> bool {
    let statements = statements(policy);
    if statements.iter().any(|s| statement_applies(s, "Deny", method_arn)) {
        return false;
    }
    statements.iter().any(|s| statement_applies(s, "Allow", method_arn))
}

fn statements(policy: &Value) -> Vec<&Value> {
    let statement = policy.get("Statement").or_else(|| policy.get("statement"));
    match statement {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => Vec::new(),
    }
}

fn string_or_list(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn statement_applies(statement: &Value, effect: &str, method_arn: &str) -> bool {
    let matches_effect = statement
        .get("Effect")
        .and_then(Value::as_str)
        .is_some_and(|e| e.eq_ignore_ascii_case(effect));
    if !matches_effect {
        return false;
    }

    if statement.get("Action").is_some() {
        let actions = string_or_list(statement.get("Action"));
        if !actions.iter().any(|a| glob_match(a, INVOKE_ACTION, true)) {
            return false;
        }
    }

    string_or_list(statement.get("Resource"))
        .iter()
        .any(|resource| resource_matches(resource, method_arn))
}

/// Match a policy resource against a method ARN.
pub fn resource_matches(resource: &str, method_arn: &str) -> bool {
    if resource == method_arn || resource == "*" || resource == "arn:aws:execute-api:**" {
        return true;
    }
    if !resource.contains(['*', '?']) {
        return false;
    }

    match (split_arn(resource), split_arn(method_arn)) {
        (Some(pattern), Some(arn)) => {
            let path_matches = if pattern.resource.contains('/') {
                glob_match(pattern.api_id, arn.api_id, false) && glob_match(pattern.tail, arn.tail, false)
            } else {
                glob_match(pattern.resource, arn.resource, false)
            };
            glob_match(pattern.region, arn.region, false)
                && glob_match(pattern.account, arn.account, false)
                && path_matches
        }
        _ => false,
    }
}

struct ArnParts<'a> {
    region: &'a str,
    account: &'a str,
    /// `api-id/stage/METHOD/path`
    resource: &'a str,
    api_id: &'a str,
    /// `stage/METHOD/path`
    tail: &'a str,
}

fn split_arn(arn: &str) -> Option<ArnParts<'_>> {
    let mut parts = arn.splitn(6, ':');
    let (arn_prefix, partition, service) = (parts.next()?, parts.next()?, parts.next()?);
    if arn_prefix != "arn" || partition.is_empty() || service != "execute-api" {
        return None;
    }
    let region = parts.next()?;
    let account = parts.next()?;
    let resource = parts.next()?;
    let (api_id, tail) = resource.split_once('/').unwrap_or((resource, ""));
    Some(ArnParts {
        region,
        account,
        resource,
        api_id,
        tail,
    })
}

fn glob_match(pattern: &str, value: &str, case_insensitive: bool) -> bool {
    let mut expr = String::from(if case_insensitive { "(?i)^" } else { "^" });
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            _ => expr.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr).is_ok_and(|re| re.is_match(value))
}
