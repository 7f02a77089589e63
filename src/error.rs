//! Taxonomía de errores del núcleo y su traducción a respuestas HTTP.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Fallos de la llamada al modelo de lenguaje.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("la llamada al modelo superó el tiempo límite de {0} s")]
    Timeout(u64),

    #[error("error del proveedor LLM: {0}")]
    Provider(String),

    #[error("la llamada al modelo fue cancelada")]
    Cancelled,
}

/// Fallos del almacén de documentos/proteínas.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} no encontrado: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("error del backend de almacenamiento: {0}")]
    Backend(String),

    #[error("dato inválido en el almacén: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }
}

impl From<neo4rs::Error> for StoreError {
    fn from(err: neo4rs::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Error de frontera: lo que los handlers devuelven al cliente.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("entrada inválida: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("modelo no disponible: {0}")]
    ModelUnavailable(#[from] LlmError),

    #[error("error de almacenamiento: {0}")]
    Storage(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Mensaje para el cliente. Nunca incluye el detalle interno.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::NotFound(_) => "Resource not found".to_string(),
            Self::ModelUnavailable(_) => {
                "The assistant is temporarily unavailable. Please try again.".to_string()
            }
            Self::Storage(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Error interno en la API: {}", self);
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
