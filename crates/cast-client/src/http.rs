use crate::action::{Action, ActionReply};
use crate::app_state::ViewState;
use crate::core::CoreEvent;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
struct HttpState {
    view_rx: watch::Receiver<ViewState>,
    event_tx: mpsc::Sender<CoreEvent>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    view_rx: watch::Receiver<ViewState>,
    event_tx: mpsc::Sender<CoreEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(view_rx, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

pub fn router(view_rx: watch::Receiver<ViewState>, event_tx: mpsc::Sender<CoreEvent>) -> Router {
    Router::new()
        .route("/api/view", get(get_view))
        .route("/api/action", post(post_action))
        .route("/api/playlist.m3u", get(get_playlist))
        .layer(CorsLayer::permissive())
        .with_state(HttpState { view_rx, event_tx })
}

async fn get_view(State(state): State<HttpState>) -> Json<ViewState> {
    Json(state.view_rx.borrow().clone())
}

async fn post_action(State(state): State<HttpState>, Json(action): Json<Action>) -> Response {
    info!("HTTP API: {:?}", action);
    let (reply_tx, reply_rx) = oneshot::channel();
    let event = CoreEvent::Action {
        action,
        reply: Some(reply_tx),
    };
    if state.event_tx.send(event).await.is_err() {
        error!("Failed to send action to core");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match reply_rx.await {
        Ok(reply @ ActionReply::Rejected { .. }) => {
            warn!("HTTP API: action rejected: {:?}", reply);
            (StatusCode::UNPROCESSABLE_ENTITY, Json(reply)).into_response()
        }
        Ok(reply) => Json(reply).into_response(),
        Err(_) => {
            error!("Core dropped the action reply");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_playlist(State(state): State<HttpState>) -> Response {
    let Some(m3u) = state.view_rx.borrow().favorites_m3u.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    (
        [
            (header::CONTENT_TYPE, "audio/x-mpegurl"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"favorites.m3u\"",
            ),
        ],
        m3u,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use cast_proto::protocol::Theme;
    use tower::ServiceExt;

    /// Answers every action with `reply` until the sender side goes away.
    fn fake_core(reply: ActionReply) -> mpsc::Sender<CoreEvent> {
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let CoreEvent::Action {
                    reply: Some(slot), ..
                } = event
                {
                    let _ = slot.send(reply.clone());
                }
            }
        });
        tx
    }

    fn post(json: &str) -> Request<Body> {
        Request::post("/api/action")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_get_view() {
        let (_view_tx, view_rx) = watch::channel(ViewState::empty(Theme::Dark));
        let app = router(view_rx, fake_core(ActionReply::Ok));

        let response = app
            .oneshot(Request::get("/api/view").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["theme"], "dark");
        assert_eq!(json["playback"]["phase"], "idle");
        assert!(json.get("favorites_m3u").is_none());
    }

    #[tokio::test]
    async fn test_action_ok() {
        let (_view_tx, view_rx) = watch::channel(ViewState::empty(Theme::Light));
        let app = router(view_rx, fake_core(ActionReply::Ok));

        let response = app
            .oneshot(post(r#"{"action":"toggle_theme"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_rejected_action_is_422() {
        let (_view_tx, view_rx) = watch::channel(ViewState::empty(Theme::Light));
        let reply = ActionReply::Rejected {
            reason: "profile name must not be empty".into(),
        };
        let app = router(view_rx, fake_core(reply));

        let response = app
            .oneshot(post(r#"{"action":"create_profile","name":""}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_action_without_core_is_500() {
        let (_view_tx, view_rx) = watch::channel(ViewState::empty(Theme::Light));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let app = router(view_rx, tx);

        let response = app
            .oneshot(post(r#"{"action":"toggle_mute"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_playlist_download() {
        let mut view = ViewState::empty(Theme::Light);
        let (view_tx, view_rx) = watch::channel(view.clone());
        let app = router(view_rx, fake_core(ActionReply::Ok));

        let response = app
            .clone()
            .oneshot(Request::get("/api/playlist.m3u").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        view.favorites_m3u = Some("#EXTM3U\n".into());
        view_tx.send_replace(view);
        let response = app
            .oneshot(Request::get("/api/playlist.m3u").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "audio/x-mpegurl"
        );
        assert_eq!(body_string(response).await, "#EXTM3U\n");
    }
}
