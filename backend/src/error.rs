//! Error handling for the seed warehouse server
//!
//! Provides consistent error responses in English and Portuguese

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{DomainError, Shortfall};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Invalid token")]
    InvalidToken,

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String, message_pt: String },

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    // Validation errors
    #[error("Validation error: {message}")]
    Validation {
        field: String,
        message: String,
        message_pt: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business rule errors
    #[error("Insufficient balance for {} lot(s)", shortfalls.len())]
    InsufficientBalance { shortfalls: Vec<Shortfall> },

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Concurrent update: {0}")]
    Conflict(String),

    #[error("Referenced record cannot be removed: {0}")]
    ReferentialProtection(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[source] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message_en: String,
    pub message_pt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorDetail {
    fn new(code: &str, message_en: String, message_pt: String) -> Self {
        Self {
            code: code.to_string(),
            message_en,
            message_pt,
            field: None,
            details: None,
        }
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl AppError {
    /// Build a field-level validation error
    pub fn validation(field: &str, message: &str) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.to_string(),
            message_pt: format!("Dados inválidos: {}", message),
        }
    }

    /// Build a 401 for a request without a usable session
    pub fn unauthorized(message: &str, message_pt: &str) -> Self {
        AppError::Unauthorized {
            message: message.to_string(),
            message_pt: message_pt.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidToken | AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
            AppError::Validation { .. } | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateKey(_)
            | AppError::InsufficientBalance { .. }
            | AppError::InvalidTransition(_)
            | AppError::Conflict(_)
            | AppError::ReferentialProtection(_) => StatusCode::CONFLICT,
            AppError::StorageError(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DatabaseError(_) | AppError::Internal(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn detail(&self) -> ErrorDetail {
        match self {
            AppError::InvalidToken => ErrorDetail::new(
                "INVALID_TOKEN",
                "Invalid token".to_string(),
                "Token inválido".to_string(),
            ),
            AppError::Unauthorized {
                message,
                message_pt,
            } => ErrorDetail::new("UNAUTHORIZED", message.clone(), message_pt.clone()),
            AppError::AuthorizationDenied(msg) => ErrorDetail::new(
                "AUTHORIZATION_DENIED",
                msg.clone(),
                format!("Permissão negada: {}", msg),
            ),
            AppError::Validation {
                field,
                message,
                message_pt,
            } => ErrorDetail::new("VALIDATION_ERROR", message.clone(), message_pt.clone())
                .with_field(field.clone()),
            AppError::ValidationError(msg) => ErrorDetail::new(
                "VALIDATION_ERROR",
                msg.clone(),
                format!("Dados inválidos: {}", msg),
            ),
            AppError::DuplicateKey(what) => ErrorDetail::new(
                "DUPLICATE_KEY",
                format!("A record with this {} already exists", what),
                format!("Já existe um registro com este(a) {}", what),
            )
            .with_field(what.clone()),
            AppError::NotFound(resource) => ErrorDetail::new(
                "NOT_FOUND",
                format!("{} not found", resource),
                format!("{} não encontrado(a)", resource),
            ),
            AppError::InsufficientBalance { shortfalls } => {
                let mut detail = ErrorDetail::new(
                    "INSUFFICIENT_BALANCE",
                    format!("Insufficient balance for {} lot(s)", shortfalls.len()),
                    format!("Saldo insuficiente em {} lote(s)", shortfalls.len()),
                );
                detail.details = serde_json::to_value(shortfalls).ok();
                detail
            }
            AppError::InvalidTransition(msg) => ErrorDetail::new(
                "INVALID_TRANSITION",
                msg.clone(),
                format!("Mudança de status não permitida: {}", msg),
            ),
            AppError::Conflict(msg) => ErrorDetail::new(
                "CONFLICT",
                format!("Concurrent update, please retry: {}", msg),
                "Outra operação alterou estes dados ao mesmo tempo; tente novamente".to_string(),
            ),
            AppError::ReferentialProtection(what) => ErrorDetail::new(
                "REFERENTIAL_PROTECTION",
                format!("{} is still referenced and cannot be removed", what),
                format!("{} ainda está em uso e não pode ser removido(a)", what),
            ),
            AppError::StorageError(msg) => ErrorDetail::new(
                "STORAGE_ERROR",
                format!("Storage error: {}", msg),
                format!("Erro no armazenamento de arquivos: {}", msg),
            ),
            AppError::DatabaseError(_) => ErrorDetail::new(
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                "Ocorreu um erro no banco de dados".to_string(),
            ),
            AppError::Internal(_) | AppError::InternalError(_) => ErrorDetail::new(
                "INTERNAL_ERROR",
                "An internal server error occurred".to_string(),
                "Ocorreu um erro interno no servidor".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        (status, Json(ErrorResponse { error: self.detail() })).into_response()
    }
}

/// Human label for the constraints a client can trip
fn constraint_label(constraint: &str) -> &str {
    match constraint {
        "stocks_merge_key_idx" => "merge key",
        "map_elements_identifier_idx" => "identifier",
        "warehouses_number_key" => "warehouse number",
        "products_code_key" => "code",
        "users_username_key" => "username",
        c if c.ends_with("_name_key") => "name",
        other => other,
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            let constraint = db_err.constraint().map(constraint_label).unwrap_or("record");
            match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => return AppError::DuplicateKey(constraint.to_string()),
                // foreign_key_violation
                Some("23503") => return AppError::ReferentialProtection(constraint.to_string()),
                // check_violation
                Some("23514") => {
                    return AppError::ValidationError(format!(
                        "value rejected by constraint {}",
                        constraint
                    ))
                }
                // deadlock_detected, serialization_failure
                Some("40P01") | Some("40001") => {
                    return AppError::Conflict(db_err.message().to_string())
                }
                _ => {}
            }
        }
        AppError::DatabaseError(err)
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Invalid { field, message } => AppError::validation(field, message),
            DomainError::InsufficientBalance(shortfall) => AppError::InsufficientBalance {
                shortfalls: vec![shortfall],
            },
            DomainError::Shortfalls(shortfalls) => AppError::InsufficientBalance { shortfalls },
            err @ DomainError::InvalidTransition { .. } => {
                AppError::InvalidTransition(err.to_string())
            }
            err @ DomainError::UnsupportedVersion(_) => AppError::validation("version", &err.to_string()),
            DomainError::DuplicateKey(what) => AppError::DuplicateKey(what.to_string()),
            DomainError::Referenced(what) => AppError::ReferentialProtection(what.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field_errors = errors.field_errors();
        let mut fields: Vec<_> = field_errors.iter().collect();
        fields.sort_by_key(|(field, _)| *field);
        match fields.first() {
            Some((field, errs)) => {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref())
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid", field));
                AppError::validation(field, &message)
            }
            None => AppError::ValidationError(errors.to_string()),
        }
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_conflicts_map_to_409() {
        let errors = [
            AppError::DuplicateKey("merge key".into()),
            AppError::InsufficientBalance { shortfalls: vec![] },
            AppError::InvalidTransition("x".into()),
            AppError::ReferentialProtection("cultivar".into()),
            AppError::Conflict("deadlock detected".into()),
        ];
        for err in errors {
            assert_eq!(err.status_code(), StatusCode::CONFLICT);
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::validation("lot", "Lot is required").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::AuthorizationDenied("not owner".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::NotFound("Stock".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_domain_errors_convert() {
        let err: AppError = DomainError::invalid("address", "Address is required").into();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "address"));

        let shortfall = Shortfall {
            stock_id: Uuid::nil(),
            lot: "L1".into(),
            address: "P-01".into(),
            requested: 10,
            available: 5,
        };
        let err: AppError = DomainError::InsufficientBalance(shortfall.clone()).into();
        match err {
            AppError::InsufficientBalance { shortfalls } => assert_eq!(shortfalls, vec![shortfall]),
            other => panic!("unexpected {:?}", other),
        }

        let err: AppError = DomainError::DuplicateKey("merge key").into();
        assert!(matches!(err, AppError::DuplicateKey(ref what) if what == "merge key"));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err: AppError = DomainError::Referenced("Stock in a confirmed empenho").into();
        assert!(matches!(err, AppError::ReferentialProtection(_)));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_insufficient_balance_lists_lots() {
        let err = AppError::InsufficientBalance {
            shortfalls: vec![Shortfall {
                stock_id: Uuid::nil(),
                lot: "L1".into(),
                address: "P-01".into(),
                requested: 110,
                available: 100,
            }],
        };
        let detail = err.detail();
        let details = detail.details.unwrap();
        assert_eq!(details[0]["requested"], 110);
        assert_eq!(details[0]["available"], 100);
    }
}
