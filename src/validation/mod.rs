use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::shared::error::{ApiError, FieldError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    String,
    Number,
    Bool,
    Uuid,
    Array,
    Object,
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub max_len: Option<usize>,
}

const fn required(name: &'static str, kind: FieldKind) -> FieldRule {
    FieldRule {
        name,
        kind,
        required: true,
        max_len: None,
    }
}

const fn optional(name: &'static str, kind: FieldKind) -> FieldRule {
    FieldRule {
        name,
        kind,
        required: false,
        max_len: None,
    }
}

const fn text(name: &'static str, req: bool, max_len: usize) -> FieldRule {
    FieldRule {
        name,
        kind: FieldKind::String,
        required: req,
        max_len: Some(max_len),
    }
}

/// Fixed table of request-body schemas, one per resource. Create handlers
/// run the full schema; update handlers run it with `required` relaxed.
static SCHEMAS: Lazy<HashMap<&'static str, Vec<FieldRule>>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(
        "leads",
        vec![
            text("title", true, 200),
            required("pipeline_id", FieldKind::Uuid),
            optional("stage_id", FieldKind::Uuid),
            optional("client_id", FieldKind::Uuid),
            optional("description", FieldKind::String),
            optional("value", FieldKind::Number),
            text("currency", false, 8),
            text("source", false, 100),
            optional("assigned_to", FieldKind::Uuid),
        ],
    );
    table.insert(
        "clients",
        vec![
            text("name", true, 200),
            text("company", false, 200),
            text("email", false, 254),
            text("phone", false, 40),
            optional("address", FieldKind::String),
            optional("notes", FieldKind::String),
        ],
    );
    table.insert(
        "pipelines",
        vec![
            text("name", true, 120),
            optional("description", FieldKind::String),
        ],
    );
    table.insert(
        "stages",
        vec![
            text("name", true, 120),
            optional("probability", FieldKind::Number),
            optional("is_final", FieldKind::Bool),
            text("color", false, 20),
        ],
    );
    table.insert(
        "tasks",
        vec![
            text("title", true, 200),
            optional("description", FieldKind::String),
            optional("lead_id", FieldKind::Uuid),
            optional("client_id", FieldKind::Uuid),
            optional("assigned_to", FieldKind::Uuid),
            text("due_date", false, 40),
            text("status", false, 20),
        ],
    );
    table.insert(
        "calls",
        vec![
            text("phone_number", true, 40),
            text("direction", false, 20),
            optional("lead_id", FieldKind::Uuid),
            optional("client_id", FieldKind::Uuid),
        ],
    );
    table.insert(
        "proposals",
        vec![
            text("title", true, 200),
            required("lead_id", FieldKind::Uuid),
            optional("body", FieldKind::String),
            optional("amount", FieldKind::Number),
            text("currency", false, 8),
            text("status", false, 20),
        ],
    );
    table
});

fn check_kind(rule: &FieldRule, value: &Value) -> Option<String> {
    let ok = match rule.kind {
        FieldKind::String => value.is_string(),
        FieldKind::Number => value.is_number(),
        FieldKind::Bool => value.is_boolean(),
        FieldKind::Array => value.is_array(),
        FieldKind::Object => !value.is_null(),
        FieldKind::Uuid => value
            .as_str()
            .map(|s| Uuid::parse_str(s).is_ok())
            .unwrap_or(false),
    };
    if !ok {
        return Some(format!("expected {}", kind_name(rule.kind)));
    }
    if let (Some(max), Some(s)) = (rule.max_len, value.as_str()) {
        if s.chars().count() > max {
            return Some(format!("longer than {max} characters"));
        }
        if rule.required && s.trim().is_empty() {
            return Some("must not be blank".to_string());
        }
    }
    None
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::String => "a string",
        FieldKind::Number => "a number",
        FieldKind::Bool => "a boolean",
        FieldKind::Uuid => "a UUID",
        FieldKind::Array => "an array",
        FieldKind::Object => "a value",
    }
}

fn run_schema(resource: &str, body: &Value, enforce_required: bool) -> Result<(), ApiError> {
    let Some(rules) = SCHEMAS.get(resource) else {
        return Err(ApiError::Internal(format!(
            "no validation schema for resource '{resource}'"
        )));
    };

    let Some(object) = body.as_object() else {
        return Err(ApiError::BadRequest("body must be a JSON object".into()));
    };

    let mut errors = Vec::new();
    for rule in rules {
        match object.get(rule.name) {
            None | Some(Value::Null) => {
                if rule.required && enforce_required {
                    errors.push(FieldError {
                        field: rule.name.to_string(),
                        message: "is required".to_string(),
                    });
                }
            }
            Some(value) => {
                if let Some(message) = check_kind(rule, value) {
                    errors.push(FieldError {
                        field: rule.name.to_string(),
                        message,
                    });
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

/// Validates a create body: required fields must be present and well-typed.
pub fn validate_body(resource: &str, body: &Value) -> Result<(), ApiError> {
    run_schema(resource, body, true)
}

/// Validates an update body: present fields must be well-typed, nothing is
/// mandatory.
pub fn validate_partial(resource: &str, body: &Value) -> Result<(), ApiError> {
    run_schema(resource, body, false)
}

static SETTING_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]{0,119}$").expect("setting key regex"));

/// Setting keys travel in the URL path, so they get a stricter shape than
/// free-form body strings.
pub fn validate_setting_key(key: &str) -> Result<(), ApiError> {
    if SETTING_KEY_RE.is_match(key) {
        Ok(())
    } else {
        Err(ApiError::Validation(vec![FieldError {
            field: "key".to_string(),
            message: "must be lowercase alphanumeric with . _ - separators".to_string(),
        }]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_lead() {
        let body = json!({
            "title": "Warehouse roofing",
            "pipeline_id": Uuid::new_v4().to_string(),
            "value": 125000.0,
            "currency": "USD",
        });
        assert!(validate_body("leads", &body).is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let body = json!({ "value": 5000.0 });
        match validate_body("leads", &body) {
            Err(ApiError::Validation(fields)) => {
                assert!(fields.iter().any(|f| f.field == "title"));
                assert!(fields.iter().any(|f| f.field == "pipeline_id"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_types() {
        let body = json!({
            "title": "Lead",
            "pipeline_id": "not-a-uuid",
            "value": "lots",
        });
        match validate_body("leads", &body) {
            Err(ApiError::Validation(fields)) => {
                assert!(fields.iter().any(|f| f.field == "pipeline_id"));
                assert!(fields.iter().any(|f| f.field == "value"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn partial_update_skips_required() {
        let body = json!({ "phone": "+1 555 0100" });
        assert!(validate_partial("clients", &body).is_ok());
        let bad = json!({ "phone": 42 });
        assert!(validate_partial("clients", &bad).is_err());
    }

    #[test]
    fn blank_required_string_is_rejected() {
        let body = json!({ "name": "   " });
        assert!(validate_body("pipelines", &body).is_err());
    }

    #[test]
    fn setting_keys_are_constrained() {
        assert!(validate_setting_key("retell.agent_id").is_ok());
        assert!(validate_setting_key("cache_ttl-override").is_ok());
        assert!(validate_setting_key("Nope").is_err());
        assert!(validate_setting_key("").is_err());
        assert!(validate_setting_key("has space").is_err());
    }

    #[test]
    fn unknown_resource_is_an_internal_error() {
        let body = json!({});
        assert!(matches!(
            validate_body("widgets", &body),
            Err(ApiError::Internal(_))
        ));
    }
}
