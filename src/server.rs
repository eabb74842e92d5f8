//! HTTP front end.
//!
//! Every path not under the media URL goes to one fallback handler that
//! converts the axum request, runs [`pipeline::handle`] on the blocking
//! pool and converts the result back. A semaphore caps concurrent
//! pipeline runs at the configured worker count. Media files are served
//! straight from the media root.

use crate::config::effective_workers;
use crate::pipeline;
use crate::site::Site;
use crate::types;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Largest request body read into memory.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[derive(Clone)]
struct AppState {
    site: Arc<Site>,
    permits: Arc<Semaphore>,
}

/// The application router.
pub fn router(site: Arc<Site>) -> Router {
    let workers = effective_workers(&site.config.server);
    let media_mount = media_mount(&site.config.media.url);
    let media_root = site.config.media.root.clone();
    let state = AppState {
        site,
        permits: Arc::new(Semaphore::new(workers)),
    };
    let mut app = Router::new().fallback(handle).with_state(state);
    if let Some(mount) = media_mount {
        app = app.nest_service(&mount, ServeDir::new(media_root));
    }
    app.layer(TraceLayer::new_for_http())
}

/// Local mount point for the media URL, when it is a path on this server.
fn media_mount(url: &str) -> Option<String> {
    let mount = url.trim_end_matches('/');
    (mount.starts_with('/') && mount.len() > 1).then(|| mount.to_string())
}

/// Bind `listen` and serve until the process is stopped.
pub async fn serve(site: Arc<Site>) -> Result<(), ServerError> {
    let addr = site.config.server.listen.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(
        %addr,
        workers = effective_workers(&site.config.server),
        "listening"
    );
    axum::serve(listener, router(site)).await?;
    Ok(())
}

async fn handle(State(state): State<AppState>, request: Request) -> Response {
    let request = match convert_request(request).await {
        Ok(request) => request,
        Err(response) => return response,
    };
    let Ok(_permit) = state.permits.acquire().await else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let site = Arc::clone(&state.site);
    match tokio::task::spawn_blocking(move || pipeline::handle(&site, &request)).await {
        Ok(response) => convert_response(response),
        Err(e) => {
            warn!(error = %e, "pipeline task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn convert_request(request: Request) -> Result<types::Request, Response> {
    let (parts, body) = request.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut converted = types::Request::new(parts.method.as_str(), target);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            converted = converted.with_header(name.as_str(), value);
        }
    }
    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE.into_response())?;
    Ok(converted.with_body(body.to_vec()))
}

fn convert_response(response: types::Response) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = status;
    let headers = out.headers_mut();
    for (name, value) in response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "dropping invalid response header"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_mount_points() {
        assert_eq!(media_mount("/media/").as_deref(), Some("/media"));
        assert_eq!(media_mount("/uploads").as_deref(), Some("/uploads"));
        assert_eq!(media_mount("/"), None);
        assert_eq!(media_mount("https://cdn.example.com/media/"), None);
    }

    #[test]
    fn response_headers_and_status_carry_over() {
        let response = types::Response::ok("text/plain", "hi").with_header("ETag", "\"x\"");
        let converted = convert_response(response);
        assert_eq!(converted.status(), StatusCode::OK);
        assert_eq!(converted.headers()["content-type"], "text/plain");
        assert_eq!(converted.headers()["etag"], "\"x\"");
    }

    #[tokio::test]
    async fn request_keeps_query_headers_and_body() {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/form?x=1")
            .header("Accept", "text/plain")
            .body(Body::from("a=b"))
            .unwrap();
        let converted = convert_request(request).await.ok().unwrap();
        assert_eq!(converted.method, "POST");
        assert_eq!(converted.path, "/form");
        assert_eq!(converted.query.as_deref(), Some("x=1"));
        assert_eq!(converted.accept(), Some("text/plain"));
        assert_eq!(converted.body, b"a=b");
    }
}
