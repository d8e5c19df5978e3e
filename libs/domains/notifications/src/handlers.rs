use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::channels::{InAppEvent, InAppHub};
use crate::error::NotificationResult;
use crate::models::NotificationView;
use crate::repository::NotificationRepository;
use crate::service::NotificationService;

struct NotificationsState<R: NotificationRepository> {
    service: Arc<NotificationService<R>>,
    hub: InAppHub,
}

impl<R: NotificationRepository> Clone for NotificationsState<R> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            hub: self.hub.clone(),
        }
    }
}

/// Read surface: unread query, mark-as-received and the in-app event stream.
pub fn router<R: NotificationRepository + 'static>(
    service: NotificationService<R>,
    hub: InAppHub,
) -> Router {
    let state = NotificationsState {
        service: Arc::new(service),
        hub,
    };

    Router::new()
        .route("/users/{user_id}/notifications/unread", get(list_unread::<R>))
        .route("/users/{user_id}/notifications/ws", get(stream_events::<R>))
        .route("/notifications/{id}/received", post(mark_received::<R>))
        .with_state(state)
}

async fn list_unread<R: NotificationRepository>(
    State(state): State<NotificationsState<R>>,
    Path(user_id): Path<Uuid>,
) -> NotificationResult<Json<Vec<NotificationView>>> {
    let notifications = state.service.unread(user_id).await?;
    Ok(Json(notifications))
}

async fn mark_received<R: NotificationRepository>(
    State(state): State<NotificationsState<R>>,
    Path(id): Path<String>,
) -> NotificationResult<StatusCode> {
    state.service.mark_received(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stream_events<R: NotificationRepository>(
    State(state): State<NotificationsState<R>>,
    Path(user_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    let events = state.hub.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, events, user_id))
}

async fn forward_events(
    mut socket: WebSocket,
    mut events: broadcast::Receiver<InAppEvent>,
    user_id: Uuid,
) {
    debug!(user_id = %user_id, "In-app session opened");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.user_id == user_id => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(user_id = %user_id, skipped, "In-app session lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(user_id = %user_id, "In-app session closed");
}
