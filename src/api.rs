// REST API
//
// JSON routes over `CashbackService`. Every handler moves the blocking
// SQLite call onto tokio's blocking pool and wraps the result in
// `ApiResponse`; errors map to a status code in `ApiError`.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::entities::{
    BankCard, Cashback, CashbackDetails, Category, CategoryPreview, Settings, Shop, ShopPreview,
};
use crate::error::CashbackError;
use crate::jobs::JobScheduler;
use crate::service::{CashbackService, SearchResults};

#[derive(Clone)]
pub struct AppState {
    pub service: CashbackService,
    pub scheduler: Arc<JobScheduler>,
}

impl AppState {
    pub fn new(service: CashbackService, update_url: Option<String>) -> Self {
        let scheduler = Arc::new(JobScheduler::new(service.clone(), update_url));
        AppState { service, scheduler }
    }
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Service(CashbackError),
    /// The request body could not be read as the expected JSON.
    Body(JsonRejection),
}

impl From<CashbackError> for ApiError {
    fn from(err: CashbackError) -> Self {
        ApiError::Service(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Body(rejection)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Service(CashbackError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Service(CashbackError::EntryAlreadyExists(_))
            | ApiError::Service(CashbackError::CashbackOverflow { .. }) => StatusCode::CONFLICT,
            ApiError::Service(CashbackError::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Body(rejection) => rejection.status(),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Service(err) => err.to_string(),
            ApiError::Body(rejection) => rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message()),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// `Json` extractor whose rejections use the API's error envelope.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Run a service call on the blocking pool.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&CashbackService) -> crate::error::Result<T> + Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| ApiError::Service(CashbackError::Io(std::io::Error::other(e.to_string()))))?
        .map_err(ApiError::Service)
}

fn created(id: i64) -> (StatusCode, Json<ApiResponse<Created>>) {
    (StatusCode::CREATED, Json(ApiResponse::ok(Created { id })))
}

#[derive(Serialize)]
pub struct Created {
    id: i64,
}

// ============================================================================
// REQUEST BODIES
// ============================================================================

#[derive(Deserialize)]
pub struct NameRequest {
    name: String,
}

#[derive(Deserialize)]
pub struct NewShopRequest {
    category_id: i64,
    name: String,
}

#[derive(Deserialize)]
pub struct UpdateShopRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
pub struct RunJobsParams {
    #[serde(default)]
    force: bool,
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/categories", get(list_categories).post(create_category))
        .route(
            "/api/categories/:id",
            get(get_category).put(rename_category).delete(delete_category),
        )
        .route("/api/categories/:id/shops", get(category_shops))
        .route("/api/categories/:id/cashbacks", get(category_cashbacks))
        .route("/api/shops", get(list_shops).post(create_shop))
        .route("/api/shops/:id", get(get_shop).put(update_shop).delete(delete_shop))
        .route("/api/shops/:id/cashbacks", get(shop_cashbacks))
        .route("/api/cards", get(list_cards).post(create_card))
        .route("/api/cards/:id", get(get_card).put(update_card).delete(delete_card))
        .route("/api/cards/:id/cashbacks", get(card_cashbacks))
        .route("/api/cashbacks", get(list_cashbacks).post(create_cashback))
        .route(
            "/api/cashbacks/:id",
            get(get_cashback).put(update_cashback).delete(delete_cashback),
        )
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/search", get(search))
        .route("/api/jobs/run", post(run_jobs))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /api/health
async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::ok("OK"))
}

// ---- categories ------------------------------------------------------------

async fn list_categories(State(state): State<AppState>) -> ApiResult<Vec<CategoryPreview>> {
    let data = blocking(&state, |s| s.fetch_categories()).await?;
    Ok(Json(ApiResponse::ok(data)))
}

async fn create_category(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<NameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = blocking(&state, move |s| s.add_category(&body.name)).await?;
    Ok(created(id))
}

async fn get_category(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Category> {
    let data = blocking(&state, move |s| s.get_category(id)).await?;
    Ok(Json(ApiResponse::ok(data)))
}

async fn rename_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(body): ApiJson<NameRequest>,
) -> ApiResult<()> {
    blocking(&state, move |s| s.rename_category(id, &body.name)).await?;
    Ok(Json(ApiResponse::ok(())))
}

async fn delete_category(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    blocking(&state, move |s| s.delete_category(id)).await?;
    Ok(Json(ApiResponse::ok(())))
}

async fn category_shops(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Vec<ShopPreview>> {
    let data = blocking(&state, move |s| s.fetch_shops_from_category(id)).await?;
    Ok(Json(ApiResponse::ok(data)))
}

async fn category_cashbacks(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Vec<CashbackDetails>> {
    let data = blocking(&state, move |s| s.fetch_cashbacks_from_category(id)).await?;
    Ok(Json(ApiResponse::ok(data)))
}

// ---- shops -----------------------------------------------------------------

async fn list_shops(State(state): State<AppState>) -> ApiResult<Vec<ShopPreview>> {
    let data = blocking(&state, |s| s.fetch_all_shops()).await?;
    Ok(Json(ApiResponse::ok(data)))
}

async fn create_shop(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<NewShopRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = blocking(&state, move |s| s.add_shop(body.category_id, &body.name)).await?;
    Ok(created(id))
}

async fn get_shop(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Shop> {
    let data = blocking(&state, move |s| s.get_shop(id)).await?;
    Ok(Json(ApiResponse::ok(data)))
}

/// PUT /api/shops/:id - rename and/or move to another category
async fn update_shop(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(body): ApiJson<UpdateShopRequest>,
) -> ApiResult<()> {
    blocking(&state, move |s| s.update_shop(id, body.name.as_deref(), body.category_id)).await?;
    Ok(Json(ApiResponse::ok(())))
}

async fn delete_shop(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    blocking(&state, move |s| s.delete_shop(id)).await?;
    Ok(Json(ApiResponse::ok(())))
}

async fn shop_cashbacks(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Vec<CashbackDetails>> {
    let data = blocking(&state, move |s| s.fetch_cashbacks_from_shop(id)).await?;
    Ok(Json(ApiResponse::ok(data)))
}

// ---- cards -----------------------------------------------------------------

async fn list_cards(State(state): State<AppState>) -> ApiResult<Vec<BankCard>> {
    let data = blocking(&state, |s| s.fetch_cards()).await?;
    Ok(Json(ApiResponse::ok(data)))
}

async fn create_card(
    State(state): State<AppState>,
    ApiJson(card): ApiJson<BankCard>,
) -> Result<impl IntoResponse, ApiError> {
    let id = blocking(&state, move |s| s.add_card(card)).await?;
    Ok(created(id))
}

async fn get_card(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<BankCard> {
    let data = blocking(&state, move |s| s.get_card(id)).await?;
    Ok(Json(ApiResponse::ok(data)))
}

async fn update_card(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(mut card): ApiJson<BankCard>,
) -> ApiResult<()> {
    card.id = id;
    blocking(&state, move |s| s.update_card(card)).await?;
    Ok(Json(ApiResponse::ok(())))
}

async fn delete_card(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    blocking(&state, move |s| s.delete_card(id)).await?;
    Ok(Json(ApiResponse::ok(())))
}

async fn card_cashbacks(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Vec<CashbackDetails>> {
    let data = blocking(&state, move |s| s.fetch_cashbacks_from_card(id)).await?;
    Ok(Json(ApiResponse::ok(data)))
}

// ---- cashbacks -------------------------------------------------------------

async fn list_cashbacks(State(state): State<AppState>) -> ApiResult<Vec<CashbackDetails>> {
    let data = blocking(&state, |s| s.fetch_all_cashbacks()).await?;
    Ok(Json(ApiResponse::ok(data)))
}

async fn create_cashback(
    State(state): State<AppState>,
    ApiJson(cashback): ApiJson<Cashback>,
) -> Result<impl IntoResponse, ApiError> {
    let id = blocking(&state, move |s| s.add_cashback(cashback)).await?;
    Ok(created(id))
}

async fn get_cashback(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<CashbackDetails> {
    let data = blocking(&state, move |s| s.get_cashback(id)).await?;
    Ok(Json(ApiResponse::ok(data)))
}

async fn update_cashback(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(mut cashback): ApiJson<Cashback>,
) -> ApiResult<()> {
    cashback.id = id;
    blocking(&state, move |s| s.update_cashback(cashback)).await?;
    Ok(Json(ApiResponse::ok(())))
}

async fn delete_cashback(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    blocking(&state, move |s| s.delete_cashback(id)).await?;
    Ok(Json(ApiResponse::ok(())))
}

// ---- settings, search, jobs --------------------------------------------------

async fn get_settings(State(state): State<AppState>) -> ApiResult<Settings> {
    let settings = blocking(&state, |s| s.get_settings()).await?;
    Ok(Json(ApiResponse::ok(settings)))
}

async fn update_settings(
    State(state): State<AppState>,
    ApiJson(settings): ApiJson<Settings>,
) -> ApiResult<Settings> {
    blocking(&state, move |s| s.update_settings(settings)).await?;
    Ok(Json(ApiResponse::ok(settings)))
}

/// GET /api/search?q=...
async fn search(State(state): State<AppState>, Query(params): Query<SearchParams>) -> ApiResult<SearchResults> {
    let data = blocking(&state, move |s| s.search_all(&params.q)).await?;
    Ok(Json(ApiResponse::ok(data)))
}

/// POST /api/jobs/run[?force=true]
async fn run_jobs(
    State(state): State<AppState>,
    Query(params): Query<RunJobsParams>,
) -> ApiResult<crate::jobs::JobReport> {
    let scheduler = Arc::clone(&state.scheduler);
    let report = tokio::task::spawn_blocking(move || {
        let now = Utc::now();
        if params.force {
            scheduler.run_all(now)
        } else {
            scheduler.run_due(now)
        }
    })
    .await
    .map_err(|e| ApiError::Service(CashbackError::Io(std::io::Error::other(e.to_string()))))?;
    Ok(Json(ApiResponse::ok(report)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn build_router() -> Router {
        let service = CashbackService::new(open_in_memory().unwrap());
        router(AppState::new(service, None))
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&value).unwrap())
            }
            None => Body::empty(),
        };

        let response = router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let payload = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, payload)
    }

    #[tokio::test]
    async fn test_health() {
        let router = build_router();
        let (status, body) = send(&router, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "OK");
    }

    #[tokio::test]
    async fn test_category_crud_and_errors() {
        let router = build_router();

        let (status, body) = send(&router, "POST", "/api/categories", Some(json!({"name": "Food"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["data"]["id"].as_i64().unwrap();

        let (status, body) = send(&router, "POST", "/api/categories", Some(json!({"name": "food"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);

        let (status, _) = send(&router, "POST", "/api/categories", Some(json!({"name": "   "}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = send(&router, "GET", "/api/categories", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let uri = format!("/api/categories/{}", id);
        let (status, _) = send(&router, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_cashback_overflow_is_conflict() {
        let router = build_router();
        let (_, body) = send(&router, "POST", "/api/categories", Some(json!({"name": "Fuel"}))).await;
        let category_id = body["data"]["id"].as_i64().unwrap();
        let (status, body) = send(
            &router,
            "POST",
            "/api/cards",
            Some(json!({"id": 0, "name": "Limited", "max_cashbacks_number": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let card_id = body["data"]["id"].as_i64().unwrap();

        let cashback = |amount: f64| {
            json!({
                "id": 0,
                "owner": {"type": "Category", "id": category_id},
                "bank_card_id": card_id,
                "amount": amount,
                "measure_unit": "%",
                "start_date": "2030-01-01",
                "expiration_date": "2030-01-31",
            })
        };

        let (status, _) = send(&router, "POST", "/api/cashbacks", Some(cashback(5.0))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = send(&router, "POST", "/api/cashbacks", Some(cashback(3.0))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("2030-01"));
    }

    #[tokio::test]
    async fn test_search_and_settings() {
        let router = build_router();
        send(&router, "POST", "/api/categories", Some(json!({"name": "Travel"}))).await;

        let (status, body) = send(&router, "GET", "/api/search?q=trav", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["categories"].as_array().unwrap().len(), 1);

        let (status, body) = send(
            &router,
            "PUT",
            "/api/settings",
            Some(json!({"color_theme": "Dark", "auto_delete_expired_cashbacks": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["dynamic_color"], true);

        let (_, body) = send(&router, "GET", "/api/settings", None).await;
        assert_eq!(body["data"]["color_theme"], "Dark");
    }

    #[tokio::test]
    async fn test_malformed_body_uses_error_envelope() {
        let router = build_router();
        let request = Request::builder()
            .method("POST")
            .uri("/api/categories")
            .header("content-type", "application/json")
            .body(Body::from("{\"name\": "))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());

        // Well-formed JSON with the wrong shape
        let (status, body) = send(&router, "POST", "/api/categories", Some(json!({"title": "Food"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_rejected_shop_update_changes_nothing() {
        let router = build_router();
        let (_, body) = send(&router, "POST", "/api/categories", Some(json!({"name": "Marketplaces"}))).await;
        let marketplaces = body["data"]["id"].as_i64().unwrap();
        let (_, body) = send(&router, "POST", "/api/categories", Some(json!({"name": "Electronics"}))).await;
        let electronics = body["data"]["id"].as_i64().unwrap();
        let (_, body) = send(
            &router,
            "POST",
            "/api/shops",
            Some(json!({"category_id": marketplaces, "name": "Ozon"})),
        )
        .await;
        let uri = format!("/api/shops/{}", body["data"]["id"].as_i64().unwrap());

        let (status, _) = send(&router, "PUT", &uri, Some(json!({"category_id": electronics, "name": "   "}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, body) = send(&router, "GET", &uri, None).await;
        assert_eq!(body["data"]["category_id"], marketplaces);
        assert_eq!(body["data"]["name"], "Ozon");
    }

    #[tokio::test]
    async fn test_run_jobs() {
        let router = build_router();
        let (status, body) = send(&router, "POST", "/api/jobs/run", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["entries"].as_array().unwrap().len(), 2);
    }
}
