//! Embedded local HTTP server for live-video verification: serves the player
//! page, the live MP4 stream, and accepts the verification form's response.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpSocket;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::queue::{Mp4Chunk, Mp4QueueSender};

const TEMPLATE: &str = include_str!("../templates/video_verification.html");

struct AppState {
    prompt_text: String,
    prompt_options: HashMap<String, i64>,
    mp4_queue: Mp4QueueSender,
    response_tx: mpsc::Sender<i64>,
}

/// A running instance of the embedded verification server. Dropping this
/// (or calling `stop`) aborts the accept loop; the listener is explicitly
/// bound with `SO_REUSEADDR` so a fresh prompt can rebind the same port
/// right after a prior one releases it.
pub struct VideoHttpServer {
    handle: tokio::task::JoinHandle<()>,
    local_addr: SocketAddr,
}

impl VideoHttpServer {
    pub async fn start(
        port: u16,
        prompt_text: String,
        prompt_options: HashMap<String, i64>,
        mp4_queue: Mp4QueueSender,
        response_tx: mpsc::Sender<i64>,
    ) -> anyhow::Result<Self> {
        let state = Arc::new(AppState {
            prompt_text,
            prompt_options,
            mp4_queue,
            response_tx,
        });

        let router = Router::new()
            .route("/", get(serve_player))
            .route("/video_live.mp4", get(stream_live_video))
            .route(
                "/submit_response",
                post(handle_response).options(submit_response_options),
            )
            .with_state(state);

        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "video verification HTTP server listening");

        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                warn!(%err, "video verification HTTP server stopped with error");
            }
        });

        Ok(Self { handle, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

async fn serve_player(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut radio_options_html = String::new();
    for (label, value) in state.prompt_options.iter() {
        radio_options_html.push_str(&format!(
            "<div class=\"popup-radio-row\" data-value=\"{value}\" onclick=\"selectOption({value})\">\
             <input type=\"radio\" id=\"radio_{value}\" name=\"group_1\" value=\"{value}\">\
             <label for=\"radio_{value}\">{label}</label></div>",
            value = value,
            label = html_escape(label),
        ));
    }

    let body = TEMPLATE
        .replacen("{prompt_text}", &html_escape(&state.prompt_text), 1)
        .replacen("{radio_options_html}", &radio_options_html, 1);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(body))
        .unwrap()
}

async fn stream_live_video(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rx = state.mp4_queue.subscribe();
    let body_stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(Mp4Chunk::Data(bytes)) => return Some((Ok::<_, std::io::Error>(bytes), rx)),
                Ok(Mp4Chunk::EndOfStream) => return None,
                Err(skipped) => {
                    warn!(skipped, "HTTP client lagged behind live MP4 stream, continuing from tail");
                    continue;
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body_stream))
        .unwrap()
}

#[derive(Debug, Deserialize)]
struct SubmitResponseBody {
    response: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct SuccessBody {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

async fn handle_response(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitResponseBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(payload) = match body {
        Ok(json) => json,
        Err(err) => {
            return json_error(StatusCode::BAD_REQUEST, format!("Invalid JSON: {err}"));
        }
    };

    let raw = match payload.response {
        Some(v) => v,
        None => return json_error(StatusCode::BAD_REQUEST, "Missing 'response' key in JSON payload".to_string()),
    };

    let value = match raw.as_i64() {
        Some(v) => v,
        None => return json_error(StatusCode::BAD_REQUEST, format!("Invalid response value: {raw}")),
    };

    match state.response_tx.try_send(value) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json"), (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
            Json(SuccessBody { status: "success" }),
        )
            .into_response(),
        Err(_) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "Response queue is full".to_string()),
    }
}

async fn submit_response_options() -> impl IntoResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS")
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type")
        .body(Body::empty())
        .unwrap()
}

fn json_error(status: StatusCode, message: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json"), (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(ErrorBody { error: message }),
    )
        .into_response()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escape_neutralizes_markup() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
    }

    #[test]
    fn template_has_both_placeholders() {
        assert!(TEMPLATE.contains("{prompt_text}"));
        assert!(TEMPLATE.contains("{radio_options_html}"));
    }
}
