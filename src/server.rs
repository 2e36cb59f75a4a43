//! HTTP front end: `POST /screenshot` takes a form and answers with the base64
//! encoded image.

use crate::{screenshot_with_cancel, validate_url, Config, Viewport};
use axum::extract::rejection::FormRejection;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_TIME_WAIT: Duration = Duration::from_secs(15);
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1920;
pub const MAX_VIEWPORT_WIDTH: u32 = 4096;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 1080;
pub const MAX_VIEWPORT_HEIGHT: u32 = 2160;
pub const DEFAULT_FULL_PAGE: bool = true;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>webpage-screenshot</title></head>
<body>
<form method="post" action="/screenshot">
  <p><label>URL <input name="url" type="url" required></label></p>
  <p><label>Wait (s) <input name="time-wait" type="number" min="0" value="15"></label></p>
  <p><label>Width <input name="viewport-width" type="number" value="1920"></label>
     <label>Height <input name="viewport-height" type="number" value="1080"></label></p>
  <p><label>Full page <select name="fullpage"><option>true</option><option>false</option></select></label></p>
  <p><label>User agent <input name="user-agent"></label></p>
  <p><label>Accept language <input name="accept-language"></label></p>
  <p><button type="submit">Capture</button></p>
</form>
</body>
</html>
"#;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("empty remote URL")]
    EmptyUrl,

    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),
}

/// The form as posted. Every field is free text; [`ScreenshotForm::parse`]
/// applies defaults and limits.
#[derive(Debug, Default, Deserialize)]
pub struct RawScreenshotForm {
    #[serde(default)]
    pub url: String,
    #[serde(rename = "time-wait", default)]
    pub time_wait: String,
    #[serde(rename = "viewport-width", default)]
    pub viewport_width: String,
    #[serde(rename = "viewport-height", default)]
    pub viewport_height: String,
    #[serde(default)]
    pub fullpage: String,
    #[serde(rename = "user-agent", default)]
    pub user_agent: String,
    #[serde(rename = "accept-language", default)]
    pub accept_language: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotForm {
    pub url: String,
    pub time_wait: Duration,
    pub viewport: Viewport,
    pub full_page: bool,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parsed dimension if it lies in `1..=max`, `default` otherwise.
fn dimension(value: &str, default: u32, max: u32) -> u32 {
    match value.trim().parse::<u32>() {
        Ok(v) if v > 0 && v <= max => v,
        _ => default,
    }
}

impl ScreenshotForm {
    /// Unparseable numbers fall back to their defaults. A wait that is
    /// negative or beyond `max_wait` becomes `max_wait`.
    pub fn parse(raw: &RawScreenshotForm, max_wait: Duration) -> Result<Self, FormError> {
        let url = raw.url.trim();
        if url.is_empty() {
            return Err(FormError::EmptyUrl);
        }
        if validate_url(url).is_err() {
            return Err(FormError::InvalidUrl(url.to_string()));
        }

        let time_wait = match raw.time_wait.trim().parse::<i64>() {
            Ok(secs) => u64::try_from(secs)
                .map(|secs| Duration::from_secs(secs).min(max_wait))
                .unwrap_or(max_wait),
            Err(_) => DEFAULT_TIME_WAIT.min(max_wait),
        };

        let full_page = match raw.fullpage.trim().to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => DEFAULT_FULL_PAGE,
        };

        Ok(Self {
            url: url.to_string(),
            time_wait,
            viewport: Viewport::new(
                dimension(&raw.viewport_width, DEFAULT_VIEWPORT_WIDTH, MAX_VIEWPORT_WIDTH),
                dimension(&raw.viewport_height, DEFAULT_VIEWPORT_HEIGHT, MAX_VIEWPORT_HEIGHT),
            ),
            full_page,
            user_agent: non_empty(&raw.user_agent),
            accept_language: non_empty(&raw.accept_language),
        })
    }

    /// The capture configuration for this request on top of the server's base.
    pub fn apply(&self, base: &Config) -> Config {
        Config {
            url: self.url.clone(),
            wait: self.time_wait,
            viewport: self.viewport,
            full_page: self.full_page,
            user_agent: self.user_agent.clone(),
            accept_language: self.accept_language.clone(),
            ..base.clone()
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub base: Arc<Config>,
    pub metrics: Option<PrometheusHandle>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(base: Config, metrics: Option<PrometheusHandle>, shutdown: CancellationToken) -> Self {
        Self {
            base: Arc::new(base),
            metrics,
            shutdown,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/screenshot", post(handle_screenshot))
        .route("/metrics", get(handle_metrics))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Serve until `state.shutdown` is cancelled. In-flight captures are
/// cancelled with it.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    info!(addr = %listener.local_addr()?, "Starting webpage-screenshot server");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
}

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn handle_screenshot(
    State(state): State<AppState>,
    raw: Result<Form<RawScreenshotForm>, FormRejection>,
) -> Response {
    // unreadable bodies are reported like any other form error
    let Form(raw) = match raw {
        Ok(raw) => raw,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.body_text()).into_response(),
    };

    let form = match ScreenshotForm::parse(&raw, state.base.deadline) {
        Ok(form) => form,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    info!(
        remote_url = %form.url,
        wait_time = ?form.time_wait,
        fullscreen = form.full_page,
        size = %format!("{}x{}", form.viewport.width, form.viewport.height),
        emulated_user_agent = form.user_agent.as_deref().unwrap_or(""),
        accept_language = form.accept_language.as_deref().unwrap_or(""),
        "Screenshot requested"
    );

    let config = form.apply(&state.base);
    match screenshot_with_cancel(&config, state.shutdown.child_token()).await {
        Ok(image) => (StatusCode::OK, STANDARD.encode(image)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn handle_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn log_requests(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req
        .uri()
        .path_and_query()
        .map(|p| p.to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let user_agent = req
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let response = next.run(req).await;
    let status = response.status();

    if status.is_server_error() {
        warn!(%method, %path, status = status.as_u16(), remote_ip = %remote, %user_agent, elapsed = ?start.elapsed(), "Request failed");
    } else {
        info!(%method, %path, status = status.as_u16(), remote_ip = %remote, %user_agent, elapsed = ?start.elapsed(), "Request");
    }

    response
}
