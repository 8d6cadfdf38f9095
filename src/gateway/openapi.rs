use utoipa::OpenApi;

use super::handlers;
use crate::storage;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Loyalty Gateway API",
        description = "Loyalty-points accrual gateway: order uploads, balances, withdrawals."
    ),
    paths(
        handlers::register,
        handlers::login,
        handlers::upload_order,
        handlers::list_orders,
        handlers::get_balance,
        handlers::withdraw,
        handlers::list_withdrawals,
    ),
    components(schemas(
        handlers::Credentials,
        handlers::WithdrawRequest,
        storage::Order,
        storage::OrderStatus,
        storage::Balance,
        storage::Withdrawal,
    )),
    tags((name = "user", description = "Loyalty account operations"))
)]
pub struct ApiDoc;
