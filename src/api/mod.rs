//! JSON API over the transaction service.
//!
//! Every route is scoped to the caller named by the `X-User-Id` header.
//! Ledger calls are blocking and run on tokio's blocking pool.

mod cache;
mod handlers;
mod models;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::service::TransactionService;

pub use cache::TransactionCache;
pub use handlers::{ApiError, UserId};
pub use models::{
    AccountQuery, CreateAccountFeeRequest, CreateAccountRequest, CreateTransactionRequest,
    ListTransactionsQuery,
};

/// Shared application state
pub struct AppState {
    pub service: TransactionService,
    pub cache: TransactionCache,
}

impl AppState {
    pub fn new(service: TransactionService, config: &Config) -> AppState {
        AppState {
            service,
            cache: TransactionCache::new(config.cache_ttl()),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/transactions",
            get(handlers::list_transactions).post(handlers::create_transaction),
        )
        .route(
            "/transactions/:id/consumptions",
            get(handlers::transaction_consumptions),
        )
        .route("/positions", get(handlers::positions))
        .route("/lots", get(handlers::lots))
        .route("/stock-accounts", post(handlers::create_account))
        .route("/account-fees", post(handlers::create_account_fee))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
