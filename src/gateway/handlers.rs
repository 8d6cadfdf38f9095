//! HTTP handlers for the user-facing API.

use axum::Extension;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;

use super::auth::{CurrentUser, session_cookie};
use super::error::ApiError;
use super::state::AppState;
use crate::storage::{OrderPlacement, luhn};

#[derive(Debug, Deserialize, ToSchema)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WithdrawRequest {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub sum: Decimal,
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|err| ApiError::Malformed(err.to_string()))
}

fn parse_credentials(body: &Bytes) -> Result<Credentials, ApiError> {
    let credentials: Credentials = parse_json(body)?;
    if credentials.login.is_empty() || credentials.password.is_empty() {
        return Err(ApiError::Malformed(
            "login and password must be non-empty".to_string(),
        ));
    }
    Ok(credentials)
}

/// Register a new user and authenticate it.
#[utoipa::path(
    post,
    path = "/api/user/register",
    tag = "user",
    request_body = Credentials,
    responses(
        (status = 200, description = "Registered and authenticated, session cookie set"),
        (status = 400, description = "Malformed request"),
        (status = 409, description = "Login already taken"),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let credentials = parse_credentials(&body)?;

    let user_id = state
        .store
        .create_user(&credentials.login, &credentials.password)
        .await?;
    let session = state.store.create_session(user_id).await?;

    tracing::info!(user_id, login = %credentials.login, "user registered");
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie(&session))],
    ))
}

/// Authenticate an existing user.
#[utoipa::path(
    post,
    path = "/api/user/login",
    tag = "user",
    request_body = Credentials,
    responses(
        (status = 200, description = "Authenticated, session cookie set"),
        (status = 400, description = "Malformed request"),
        (status = 401, description = "Wrong login or password"),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let credentials = parse_credentials(&body)?;

    let session = state
        .store
        .login_user(&credentials.login, &credentials.password)
        .await?;

    tracing::info!(user_id = session.user_id, "user logged in");
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie(&session))],
    ))
}

/// Upload an order number for accrual calculation. The body is the raw
/// decimal digit string.
#[utoipa::path(
    post,
    path = "/api/user/orders",
    tag = "user",
    request_body(content = String, content_type = "text/plain"),
    responses(
        (status = 202, description = "Order accepted for processing"),
        (status = 200, description = "Order already uploaded by this user"),
        (status = 400, description = "Empty or unreadable body"),
        (status = 401, description = "Not authenticated"),
        (status = 409, description = "Order uploaded by another user"),
        (status = 422, description = "Order number fails Luhn validation"),
    )
)]
pub async fn upload_order(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let number = std::str::from_utf8(&body)
        .map_err(|_| ApiError::Malformed("order number is not valid utf-8".to_string()))?
        .trim();
    if number.is_empty() {
        return Err(ApiError::Malformed("empty order number".to_string()));
    }
    if !luhn::is_valid(number) {
        return Err(ApiError::InvalidOrderNumber);
    }

    match state.store.create_order(user.0, number).await? {
        OrderPlacement::Created => {
            tracing::info!(user_id = user.0, order = number, "order accepted");
            Ok(StatusCode::ACCEPTED)
        }
        OrderPlacement::AlreadyOwnedBySameUser => Ok(StatusCode::OK),
        OrderPlacement::OwnedByOtherUser => Err(ApiError::OrderOwnedByOtherUser),
    }
}

/// List the caller's orders, oldest first.
#[utoipa::path(
    get,
    path = "/api/user/orders",
    tag = "user",
    responses(
        (status = 200, description = "Orders with statuses and accruals", body = [crate::storage::Order]),
        (status = 204, description = "No orders uploaded yet"),
        (status = 401, description = "Not authenticated"),
    )
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Response, ApiError> {
    let orders = state.store.get_orders(user.0).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(orders).into_response())
}

/// Current and withdrawn loyalty points of the caller.
#[utoipa::path(
    get,
    path = "/api/user/balance",
    tag = "user",
    responses(
        (status = 200, description = "Current balance", body = crate::storage::Balance),
        (status = 401, description = "Not authenticated"),
    )
)]
pub async fn get_balance(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let balance = state.store.get_balance(user.0).await?;
    Ok(Json(balance))
}

/// Spend points against a new order number.
#[utoipa::path(
    post,
    path = "/api/user/balance/withdraw",
    tag = "user",
    request_body = WithdrawRequest,
    responses(
        (status = 200, description = "Withdrawal recorded"),
        (status = 401, description = "Not authenticated"),
        (status = 402, description = "Insufficient funds"),
        (status = 422, description = "Order number fails Luhn validation"),
    )
)]
pub async fn withdraw(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: WithdrawRequest = parse_json(&body)?;
    if request.sum <= Decimal::ZERO {
        return Err(ApiError::Malformed("sum must be positive".to_string()));
    }
    if !luhn::is_valid(&request.order) {
        return Err(ApiError::InvalidOrderNumber);
    }

    state
        .store
        .create_withdrawal(user.0, &request.order, request.sum)
        .await?;

    tracing::info!(user_id = user.0, order = %request.order, sum = %request.sum, "withdrawal recorded");
    Ok(StatusCode::OK)
}

/// List the caller's withdrawals, oldest first.
#[utoipa::path(
    get,
    path = "/api/user/balance/withdrawals",
    tag = "user",
    responses(
        (status = 200, description = "Withdrawals", body = [crate::storage::Withdrawal]),
        (status = 204, description = "No withdrawals yet"),
        (status = 401, description = "Not authenticated"),
    )
)]
pub async fn list_withdrawals(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Response, ApiError> {
    let withdrawals = state.store.get_withdrawals(user.0).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(withdrawals).into_response())
}

/// Liveness probe: confirms the store answers.
pub async fn health(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.store.ping().await?;
    Ok("ok")
}
