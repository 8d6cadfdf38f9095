//! HTTP surface of the gateway.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod state;

pub use state::AppState;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Builds the full router: public auth endpoints, cookie-protected user
/// endpoints, health probe, and Swagger UI.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/orders",
            post(handlers::upload_order).get(handlers::list_orders),
        )
        .route("/balance", get(handlers::get_balance))
        .route("/balance/withdraw", post(handlers::withdraw))
        .route("/balance/withdrawals", get(handlers::list_withdrawals))
        .route_layer(from_fn_with_state(state.clone(), auth::auth_middleware));

    let user_api = Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .merge(protected);

    Router::new()
        .nest("/api/user", user_api)
        .route("/api/v1/health", get(handlers::health))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Serves the router until `shutdown` resolves, then finishes in-flight
/// requests and returns.
pub async fn run_server(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
