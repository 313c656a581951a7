use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use stockpulse_core::domain::recommendation::StockRecommendation;
use stockpulse_core::domain::stock::StockRecord;
use stockpulse_core::query::{StockQueryService, DEFAULT_PAGE_SIZE, DEFAULT_TOP_N};

use crate::envelope::{ApiError, ApiResponse, PaginationMeta};

#[derive(Clone)]
pub struct AppState {
    pub query: Option<StockQueryService>,
}

impl AppState {
    fn query(&self) -> Result<&StockQueryService, ApiError> {
        self.query.as_ref().ok_or_else(ApiError::unavailable)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/stocks", get(list_stocks))
        .route("/api/v1/stocks/recommendations", get(recommendations))
        .route(
            "/api/v1/stocks/recommendations/action/:action",
            get(recommendations_by_action),
        )
        .route(
            "/api/v1/stocks/recommendations/brokerage/:brokerage",
            get(recommendations_by_brokerage),
        )
        .route(
            "/api/v1/stocks/recommendations/rating/:rating",
            get(recommendations_by_rating),
        )
        .with_state(state)
}

/// `*` allows any origin without credentials; otherwise a comma-separated list
/// of origins is allowed with credentials.
pub fn cors_layer(allowed_origins: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::ACCEPT_ENCODING,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
            header::CACHE_CONTROL,
            HeaderName::from_static("x-csrf-token"),
            HeaderName::from_static("x-requested-with"),
        ]);

    if allowed_origins.trim() == "*" {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match HeaderValue::from_str(s) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = s, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    page: Option<String>,
    page_size: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TopParams {
    top_n: Option<String>,
    limit: Option<String>,
}

/// Unparsable or non-positive values fall back to `default`.
fn positive_or<T>(raw: Option<&str>, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    raw.and_then(|s| s.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}

async fn list_stocks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<Vec<StockRecord>>>, ApiError> {
    let query = state.query()?;

    let page = positive_or(params.page.as_deref(), 1u32);
    let page_size = positive_or(params.page_size.as_deref(), DEFAULT_PAGE_SIZE);

    let result = query
        .list_stocks(page, page_size)
        .await
        .map_err(ApiError::internal)?;

    let meta = PaginationMeta {
        current_page: result.page,
        page_size: result.page_size,
        total_items: result.total_items,
        total_pages: result.total_pages(),
    };

    Ok(Json(ApiResponse::paginated(
        result.items,
        meta,
        "Stocks retrieved successfully",
    )))
}

async fn recommendations(
    State(state): State<AppState>,
    Query(params): Query<TopParams>,
) -> Result<Json<ApiResponse<Vec<StockRecommendation>>>, ApiError> {
    let query = state.query()?;
    let top_n = positive_or(
        params.top_n.as_deref().or(params.limit.as_deref()),
        DEFAULT_TOP_N,
    );

    let recs = query
        .recommendations(top_n, Utc::now())
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(ApiResponse::ok(
        recs,
        "Stock recommendations retrieved successfully",
    )))
}

async fn recommendations_by_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
    Query(params): Query<TopParams>,
) -> Result<Json<ApiResponse<Vec<StockRecommendation>>>, ApiError> {
    let query = state.query()?;
    let recs = query
        .top_by_action(&action, limit_of(&params), Utc::now())
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(ApiResponse::ok(
        recs,
        "Stock recommendations by action retrieved successfully",
    )))
}

async fn recommendations_by_brokerage(
    State(state): State<AppState>,
    Path(brokerage): Path<String>,
    Query(params): Query<TopParams>,
) -> Result<Json<ApiResponse<Vec<StockRecommendation>>>, ApiError> {
    let query = state.query()?;
    let recs = query
        .top_by_brokerage(&brokerage, limit_of(&params), Utc::now())
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(ApiResponse::ok(
        recs,
        "Stock recommendations by brokerage retrieved successfully",
    )))
}

async fn recommendations_by_rating(
    State(state): State<AppState>,
    Path(rating): Path<String>,
    Query(params): Query<TopParams>,
) -> Result<Json<ApiResponse<Vec<StockRecommendation>>>, ApiError> {
    let query = state.query()?;
    let recs = query
        .top_by_rating(&rating, limit_of(&params), Utc::now())
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(ApiResponse::ok(
        recs,
        "Stock recommendations by rating retrieved successfully",
    )))
}

fn limit_of(params: &TopParams) -> usize {
    positive_or(
        params.limit.as_deref().or(params.top_n.as_deref()),
        DEFAULT_TOP_N,
    )
}
