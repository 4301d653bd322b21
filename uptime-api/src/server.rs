use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Json, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;
use uptime_core::{
    Error,
    instances::{ChannelService, InstanceService},
    models::{ChannelInput, Instance, InstanceInput, NotificationChannel},
    queue::JobQueue,
    store::{HistoryRepository, InstanceRepository, NotificationRepository},
    uptime::{self, InstanceSummary, Overview, TREND_WINDOW},
};
use uuid::Uuid;

const MAX_HISTORY: usize = 500;

pub struct AppState {
    pub instances: Arc<dyn InstanceRepository>,
    pub history: Arc<dyn HistoryRepository>,
    pub instance_service: InstanceService,
    pub channel_service: ChannelService,
}

impl AppState {
    pub fn new<S>(store: Arc<S>, queue: Arc<dyn JobQueue>) -> Self
    where
        S: InstanceRepository + HistoryRepository + NotificationRepository + 'static,
    {
        Self {
            instances: store.clone(),
            history: store.clone(),
            instance_service: InstanceService::new(store.clone(), queue),
            channel_service: ChannelService::new(store),
        }
    }
}

#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.0 {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, format!("Not found: {msg}")),
            other => {
                error!(error = %other, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/stats", get(stats))
        .route("/api/instances", get(list_instances).post(register_instance))
        .route(
            "/api/instances/{id}",
            get(get_instance).put(edit_instance).delete(remove_instance),
        )
        .route("/api/instances/{id}/history", get(instance_history))
        .route("/api/notifications", post(create_channel))
        .route(
            "/api/notifications/{id}",
            put(update_channel).delete(remove_channel),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now()
    }))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    overview: Overview,
    instances: Vec<InstanceSummary>,
}

async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatsResponse>> {
    let instances = state.instances.list().await?;

    let mut summaries = Vec::with_capacity(instances.len());
    for instance in &instances {
        let trend = state.history.recent(instance.id, TREND_WINDOW).await?;
        summaries.push(InstanceSummary::new(instance, trend));
    }

    Ok(Json(StatsResponse {
        overview: uptime::overview(&instances),
        instances: summaries,
    }))
}

async fn list_instances(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Instance>>> {
    Ok(Json(state.instances.list().await?))
}

async fn get_instance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Instance>> {
    let instance = state
        .instances
        .get(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("instance {id}")))?;
    Ok(Json(instance))
}

async fn register_instance(
    State(state): State<Arc<AppState>>,
    Json(input): Json<InstanceInput>,
) -> ApiResult<(StatusCode, Json<Instance>)> {
    let instance = state.instance_service.register(input).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

async fn edit_instance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<InstanceInput>,
) -> ApiResult<Json<Instance>> {
    Ok(Json(state.instance_service.edit(id, input).await?))
}

async fn remove_instance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.instance_service.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    instance_id: Uuid,
    history: Vec<bool>,
}

async fn instance_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    if state.instances.get(id).await?.is_none() {
        return Err(Error::not_found(format!("instance {id}")).into());
    }
    let limit = query.limit.unwrap_or(TREND_WINDOW).clamp(1, MAX_HISTORY);
    let history = state.history.recent(id, limit).await?;
    Ok(Json(HistoryResponse {
        instance_id: id,
        history,
    }))
}

async fn create_channel(
    State(state): State<Arc<AppState>>,
    Json(input): Json<ChannelInput>,
) -> ApiResult<(StatusCode, Json<NotificationChannel>)> {
    let channel = state.channel_service.create(input).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

async fn update_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<ChannelInput>,
) -> ApiResult<Json<NotificationChannel>> {
    Ok(Json(state.channel_service.update(id, input).await?))
}

async fn remove_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.channel_service.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
