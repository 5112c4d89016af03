use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, error, warn};

use crate::api::models::{
    AccountQuery, CreateAccountFeeRequest, CreateAccountRequest, CreateTransactionRequest,
    ErrorBody, ListTransactionsQuery,
};
use crate::api::AppState;
use crate::error::LedgerError;

const USER_HEADER: &str = "x-user-id";
const COST_BASIS_PREFIX: &str = "Error processing cost basis: ";

/// Caller identity taken from the `X-User-Id` header.
pub struct UserId(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| UserId(value.to_string()))
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing user identity"))
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> ApiError {
        ApiError {
            status,
            message: message.into(),
        }
    }

    fn ledger(err: LedgerError, prefix: &str) -> ApiError {
        if err.is_storage_failure() {
            error!(error = %err, "ledger operation failed");
            return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.sanitized());
        }
        let status = match err {
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, format!("{}{}", prefix, err.sanitized()))
    }

    fn body(rejection: JsonRejection) -> ApiError {
        ApiError::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> ApiError {
        ApiError::ledger(err, "")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { message: self.message })).into_response()
    }
}

/// Runs blocking ledger work off the async executor.
async fn blocking<T, F>(work: F) -> Result<Result<T, LedgerError>, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, LedgerError> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        error!(error = %err, "ledger task did not complete");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "the ledger could not be updated")
    })
}

pub async fn create_transaction(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    body: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(ApiError::body)?;
    let input = request.validate()?;

    let worker = state.clone();
    let user = user_id.clone();
    let recorded = blocking(move || worker.service.record(&user, input))
        .await?
        .map_err(|err| {
            warn!(user_id = %user_id, error = %err, "transaction rejected");
            ApiError::ledger(err, COST_BASIS_PREFIX)
        })?;

    state.cache.invalidate_user(&user_id);
    Ok((StatusCode::CREATED, Json(recorded)))
}

pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Query(params): Query<ListTransactionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let cache_key = params.cache_key();
    if let Some(page) = state.cache.get(&user_id, &cache_key) {
        debug!(user_id = %user_id, "transaction listing served from cache");
        return Ok(Json(page));
    }

    let generation = state.cache.generation(&user_id);
    let query = params.into_query()?;
    let worker = state.clone();
    let user = user_id.clone();
    let page = blocking(move || worker.service.list(&user, &query)).await??;

    state.cache.insert(&user_id, &cache_key, generation, page.clone());
    Ok(Json(page))
}

pub async fn transaction_consumptions(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(transaction_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let audit = blocking(move || state.service.consumptions(&user_id, transaction_id)).await??;
    Ok(Json(audit))
}

pub async fn positions(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Query(params): Query<AccountQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let positions = blocking(move || {
        state
            .service
            .positions(&user_id, params.stock_account_id.as_deref())
    })
    .await??;
    Ok(Json(positions))
}

pub async fn lots(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Query(params): Query<AccountQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let lots = blocking(move || {
        state.service.lots(
            &user_id,
            params.stock_account_id.as_deref(),
            params.ticker.as_deref(),
        )
    })
    .await??;
    Ok(Json(lots))
}

pub async fn create_account(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    body: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(ApiError::body)?;
    let account = blocking(move || {
        state
            .service
            .create_account(&user_id, &request.name, request.broker_name.as_deref())
    })
    .await??;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn create_account_fee(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    body: Result<Json<CreateAccountFeeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(ApiError::body)?;
    let fee = request.validate()?;

    let worker = state.clone();
    let user = user_id.clone();
    let recorded = blocking(move || worker.service.record_account_fee(&user, fee)).await??;

    // account fees feed the listing's profit stats
    state.cache.invalidate_user(&user_id);
    Ok((StatusCode::CREATED, Json(recorded)))
}
