//! API boundary errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("login already taken")]
    DuplicateLogin,

    #[error("wrong login or password")]
    WrongCredentials,

    #[error("invalid order number")]
    InvalidOrderNumber,

    #[error("order number uploaded by another user")]
    OrderOwnedByOtherUser,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("internal error")]
    Internal(#[source] StorageError),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateLogin => ApiError::DuplicateLogin,
            StorageError::WrongCredentials => ApiError::WrongCredentials,
            StorageError::InvalidSession => ApiError::Unauthorized,
            StorageError::InsufficientFunds => ApiError::InsufficientFunds,
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Malformed(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::WrongCredentials => StatusCode::UNAUTHORIZED,
            ApiError::DuplicateLogin | ApiError::OrderOwnedByOtherUser => StatusCode::CONFLICT,
            ApiError::InvalidOrderNumber => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
            ApiError::Internal(err) => {
                // Pipeline and storage internals never leak to the client.
                tracing::error!(error = %err, "request failed with internal error");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        (status, self.to_string()).into_response()
    }
}
