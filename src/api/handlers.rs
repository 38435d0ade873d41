//! Route handlers for the price, health and mode endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::core::domain::GLOBAL_EXCHANGE;
use crate::error::Error;

#[derive(Debug, Serialize)]
pub struct PriceResponse {
    pair_name: String,
    exchange: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    average_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    period: Option<String>,
    timestamp: DateTime<Utc>,
}

impl PriceResponse {
    fn new(pair_name: String, exchange: String) -> Self {
        Self {
            pair_name,
            exchange,
            price: None,
            average_price: None,
            min_price: None,
            max_price: None,
            period: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SystemResponse {
    status: &'static str,
    message: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    period: Option<String>,
}

impl PeriodQuery {
    fn as_deref(&self) -> Option<&str> {
        self.period.as_deref()
    }
}

/// Maps error kinds to HTTP statuses: caller-addressable kinds are client
/// errors, backend failures are server errors.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NoData | Error::Parse(_) | Error::Validation(_) | Error::AlreadyInMode(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<PriceResponse>, ApiError>;

pub async fn latest_by_symbol(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> ApiResult {
    let price = state.stats.latest_price(GLOBAL_EXCHANGE, &symbol).await?;
    let mut response = PriceResponse::new(symbol, GLOBAL_EXCHANGE.to_string());
    response.price = Some(price);
    Ok(Json(response))
}

pub async fn latest_by_exchange(
    State(state): State<ApiState>,
    Path((exchange, symbol)): Path<(String, String)>,
) -> ApiResult {
    let price = state.stats.latest_price(&exchange, &symbol).await?;
    let mut response = PriceResponse::new(symbol, exchange);
    response.price = Some(price);
    Ok(Json(response))
}

pub async fn highest_by_symbol(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult {
    let price = state
        .stats
        .highest_price(GLOBAL_EXCHANGE, &symbol, query.as_deref())
        .await?;
    let mut response = PriceResponse::new(symbol, GLOBAL_EXCHANGE.to_string());
    response.max_price = Some(price);
    response.period = query.period;
    Ok(Json(response))
}

pub async fn highest_by_exchange(
    State(state): State<ApiState>,
    Path((exchange, symbol)): Path<(String, String)>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult {
    let price = state
        .stats
        .highest_price(&exchange, &symbol, query.as_deref())
        .await?;
    let mut response = PriceResponse::new(symbol, exchange);
    response.max_price = Some(price);
    response.period = query.period;
    Ok(Json(response))
}

pub async fn lowest_by_symbol(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult {
    let price = state
        .stats
        .lowest_price(GLOBAL_EXCHANGE, &symbol, query.as_deref())
        .await?;
    let mut response = PriceResponse::new(symbol, GLOBAL_EXCHANGE.to_string());
    response.min_price = Some(price);
    response.period = query.period;
    Ok(Json(response))
}

pub async fn lowest_by_exchange(
    State(state): State<ApiState>,
    Path((exchange, symbol)): Path<(String, String)>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult {
    let price = state
        .stats
        .lowest_price(&exchange, &symbol, query.as_deref())
        .await?;
    let mut response = PriceResponse::new(symbol, exchange);
    response.min_price = Some(price);
    response.period = query.period;
    Ok(Json(response))
}

pub async fn average_by_symbol(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult {
    let price = state
        .stats
        .average_price(GLOBAL_EXCHANGE, &symbol, query.as_deref())
        .await?;
    let mut response = PriceResponse::new(symbol, GLOBAL_EXCHANGE.to_string());
    response.average_price = Some(price);
    response.period = query.period;
    Ok(Json(response))
}

pub async fn average_by_exchange(
    State(state): State<ApiState>,
    Path((exchange, symbol)): Path<(String, String)>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult {
    let price = state
        .stats
        .average_price(&exchange, &symbol, query.as_deref())
        .await?;
    let mut response = PriceResponse::new(symbol, exchange);
    response.average_price = Some(price);
    response.period = query.period;
    Ok(Json(response))
}

pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.control.health().await)
}

pub async fn switch_to_test(
    State(state): State<ApiState>,
) -> Result<Json<SystemResponse>, ApiError> {
    state.control.switch_to_test()?;
    Ok(Json(SystemResponse {
        status: "test",
        message: "Switched to test mode".to_string(),
        timestamp: Utc::now(),
    }))
}

pub async fn switch_to_live(
    State(state): State<ApiState>,
) -> Result<Json<SystemResponse>, ApiError> {
    state.control.switch_to_live()?;
    Ok(Json(SystemResponse {
        status: "live",
        message: "Switched to live mode".to_string(),
        timestamp: Utc::now(),
    }))
}
