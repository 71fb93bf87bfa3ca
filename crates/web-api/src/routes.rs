use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use domain::{Channel, Notification, NotificationDraft, NotificationId, OrderId, ProductId, Role, UserId};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateNotificationPayload {
    recipient: UserId,
    #[serde(flatten)]
    draft: NotificationDraft,
}

#[derive(Debug, Deserialize)]
struct ClickPayload {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct AnnouncementPayload {
    #[serde(default)]
    audience: Option<Role>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct MaintenancePayload {
    enabled: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct PublishResponse {
    delivered: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(create_notification))
        .route(
            "/notifications/{notification_id}/channels/{channel}/delivered",
            post(record_delivery),
        )
        .route("/notifications/{notification_id}/click", post(record_click))
        .route("/orders/{order_id}/updated", post(order_updated))
        .route("/products/{product_id}/updated", post(product_updated))
        .route("/announcements", post(announce))
        .route("/maintenance", post(maintenance))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn websocket_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| WebSocketConnection::new(socket, state).run())
}

/// 创建通知并在后台投递
async fn create_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateNotificationPayload>,
) -> Result<(StatusCode, Json<Notification>), ApiError> {
    state.jwt_service.require_admin(&headers)?;
    let dispatcher = state.hub.notifications();
    let notification = dispatcher
        .create(payload.recipient, payload.draft)
        .await?;
    dispatcher.dispatch_in_background(notification.clone());
    Ok((StatusCode::ACCEPTED, Json(notification)))
}

async fn record_delivery(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((notification_id, channel)): Path<(NotificationId, Channel)>,
) -> Result<Json<Notification>, ApiError> {
    state.jwt_service.require_admin(&headers)?;
    let notification = state
        .hub
        .notifications()
        .record_delivery(notification_id, channel)
        .await?;
    Ok(Json(notification))
}

/// 点击由收件人本人上报
async fn record_click(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(notification_id): Path<NotificationId>,
    Json(payload): Json<ClickPayload>,
) -> Result<Json<Notification>, ApiError> {
    let claims = state.jwt_service.claims_from_headers(&headers)?;
    let notification = state
        .hub
        .notifications()
        .record_click(notification_id, payload.channel, claims.sub)
        .await?;
    Ok(Json(notification))
}

async fn order_updated(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<OrderId>,
) -> Result<Json<PublishResponse>, ApiError> {
    state.jwt_service.require_admin(&headers)?;
    let delivered = state.hub.publish_order_update(order_id).await?;
    Ok(Json(PublishResponse { delivered }))
}

async fn product_updated(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(product_id): Path<ProductId>,
) -> Result<Json<PublishResponse>, ApiError> {
    state.jwt_service.require_admin(&headers)?;
    let delivered = state.hub.publish_product_update(product_id).await?;
    Ok(Json(PublishResponse { delivered }))
}

async fn announce(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AnnouncementPayload>,
) -> Result<Json<PublishResponse>, ApiError> {
    state.jwt_service.require_admin(&headers)?;
    let delivered = state.hub.announce(payload.audience, payload.message).await;
    Ok(Json(PublishResponse { delivered }))
}

async fn maintenance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<MaintenancePayload>,
) -> Result<Json<PublishResponse>, ApiError> {
    state.jwt_service.require_admin(&headers)?;
    let delivered = state
        .hub
        .set_maintenance(payload.enabled, payload.message)
        .await;
    Ok(Json(PublishResponse { delivered }))
}
