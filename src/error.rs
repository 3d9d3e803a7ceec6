//! Error taxonomy for calls against the registry API.
//!
//! Every failure a [`RegistryClient`](crate::client::RegistryClient) can
//! produce is an [`ApiError`]. Callers convert these into view state; none of
//! them is fatal to the process.
//!
//! | Variant | Cause |
//! |---------|-------|
//! | `Transport` | request never reached the server, or no response |
//! | `Unauthorized` / `Forbidden` | 401 / 403 |
//! | `NotFound` | 404 |
//! | `Validation` | 400/422 with a field-level error object |
//! | `Server` | any other non-success status |
//! | `Decode` | response body did not match the expected shape |
//! | `Io` | local file could not be read or written |

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("not authorized: {detail}")]
    Unauthorized { detail: String },

    #[error("forbidden: {detail}")]
    Forbidden { detail: String },

    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("validation failed:\n{}", .0.summary())]
    Validation(FieldErrors),

    #[error("server error {status}: {detail}")]
    Server { status: u16, detail: String },

    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Message suitable for showing to a user in place of the raw error.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Transport(_) => {
                "Could not reach the registry server. Check your connection.".to_string()
            }
            ApiError::Validation(fields) => {
                format!("Please check the input:\n{}", fields.summary())
            }
            ApiError::Server { detail, .. } if !detail.is_empty() => detail.clone(),
            ApiError::Server { .. } => "Server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    /// Build the error for a non-success response.
    pub(crate) fn from_status(status: u16, path: &str, body: &str) -> Self {
        let json: Option<Value> = serde_json::from_str(body).ok();
        let detail = json
            .as_ref()
            .and_then(|v| v.get("detail"))
            .and_then(|d| d.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.trim().to_string());

        match status {
            401 => ApiError::Unauthorized { detail },
            403 => ApiError::Forbidden { detail },
            404 => ApiError::NotFound {
                path: path.to_string(),
            },
            400 | 422 => match json.as_ref().and_then(FieldErrors::from_value) {
                Some(fields) => ApiError::Validation(fields),
                None => ApiError::Server { status, detail },
            },
            _ => ApiError::Server { status, detail },
        }
    }
}

/// Field-level validation errors keyed by dotted field path.
///
/// Section errors arrive nested (`{"sec2_physical": {"ph": ["..."]}}`) and
/// are flattened to `sec2_physical.ph` so they map onto a single input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl FieldErrors {
    /// Parse a validation body. Returns `None` unless it is a non-empty object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.is_empty() {
            return None;
        }
        let mut errors = FieldErrors::default();
        for (key, v) in obj {
            errors.collect(key, v);
        }
        if errors.fields.is_empty() {
            None
        } else {
            Some(errors)
        }
    }

    fn collect(&mut self, path: &str, value: &Value) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    self.collect(&format!("{}.{}", path, k), v);
                }
            }
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::Object(_) => self.collect(path, item),
                        Value::String(s) => self.push(path, s.clone()),
                        other => self.push(path, other.to_string()),
                    }
                }
            }
            Value::String(s) => self.push(path, s.clone()),
            Value::Null => {}
            other => self.push(path, other.to_string()),
        }
    }

    pub fn push(&mut self, field: &str, message: String) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message);
    }

    /// Messages for one field, if any.
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// One `field: msg, msg` line per field.
    pub fn summary(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v.join(", ")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_section_errors_flatten_to_paths() {
        let body = json!({
            "primary_name_ru": ["This field is required."],
            "sec2_physical": { "ph": ["A valid number is required."] },
            "cas_number": "already exists"
        });
        let errors = FieldErrors::from_value(&body).unwrap();
        assert_eq!(errors.len(), 3);
        assert_eq!(
            errors.get("sec2_physical.ph").unwrap(),
            &["A valid number is required.".to_string()]
        );
        assert_eq!(
            errors.summary(),
            "cas_number: already exists\n\
             primary_name_ru: This field is required.\n\
             sec2_physical.ph: A valid number is required."
        );
    }

    #[test]
    fn status_mapping() {
        let e = ApiError::from_status(400, "/registry/elements/", r#"{"cas_number":["dup"]}"#);
        assert!(matches!(e, ApiError::Validation(_)));

        let e = ApiError::from_status(400, "/x/", "plain text");
        assert!(matches!(e, ApiError::Server { status: 400, .. }));

        let e = ApiError::from_status(401, "/auth/me/", r#"{"detail":"Token expired"}"#);
        match e {
            ApiError::Unauthorized { detail } => assert_eq!(detail, "Token expired"),
            other => panic!("unexpected {:?}", other),
        }

        let e = ApiError::from_status(404, "/registry/elements/9/", "");
        assert!(matches!(e, ApiError::NotFound { .. }));

        let e = ApiError::from_status(500, "/x/", r#"{"detail":"boom"}"#);
        assert_eq!(e.user_message(), "boom");
    }

    #[test]
    fn empty_object_is_not_validation() {
        assert!(FieldErrors::from_value(&json!({})).is_none());
        assert!(FieldErrors::from_value(&json!(["x"])).is_none());
    }
}
