use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;

pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Field name to messages, reported back to the client as-is.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_result(self) -> Result<(), PerformanceError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(PerformanceError::Validation(self))
        }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{}: {}", field, messages.join(" "))?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PerformanceError {
    #[error("Validation error: {0}")]
    Validation(FieldErrors),
    #[error("Invalid pk \"{id}\" - object does not exist.")]
    UnknownEmployee { field: &'static str, id: i32 },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Database error: {0}")]
    Database(String),
}

impl PerformanceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::UnknownEmployee { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PerformanceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Validation(errors) => serde_json::json!({ "errors": errors }),
            Self::UnknownEmployee { field, .. } => {
                serde_json::json!({ "errors": FieldErrors::single(field, self.to_string()) })
            }
            Self::NotFound(msg) | Self::PermissionDenied(msg) => {
                serde_json::json!({ "error": msg })
            }
            Self::Database(msg) => {
                log::error!("Database error: {}", msg);
                serde_json::json!({ "error": "An internal server error occurred" })
            }
        };
        (status, Json(body)).into_response()
    }
}
