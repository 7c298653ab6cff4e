//! HTTP surface: feeds, media and a small JSON API over the reconciler.

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::{get, put},
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::error;

use crate::error::Error;
use crate::models::{Source, SourceWithVideos, Video};
use crate::proxy::{MediaProxy, MediaResponse};
use crate::reconcile::{Reconciler, RefreshReport};

const RSS_CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";
const MEDIA_PENDING: &str = "The server has not yet retrieved a media_url for this video.";

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Reconciler,
    pub proxy: MediaProxy,
    /// Owner recorded on sources created through the API.
    pub owner_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/feed/{source_id}", get(get_feed).put(put_feed).delete(delete_feed))
        // HEAD is dispatched to the GET handler, which forwards the method.
        .route("/media/{video_id}", get(media))
        .route("/api/v1/source", get(list_sources).post(create_source))
        .route("/api/v1/source/fetch", put(fetch_all_sources))
        .route(
            "/api/v1/source/{source_id}",
            get(get_source).delete(delete_source),
        )
        .route("/api/v1/source/{source_id}/fetch", put(fetch_source))
        .route("/api/v1/video", get(list_videos))
        .route("/api/v1/video/{video_id}", get(get_video))
        .route("/api/v1/video/{video_id}/fetch", put(fetch_video))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::NotFound(_) | Error::HandlerNotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) => StatusCode::OK,
            Error::InvalidRecord(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::ExtractionError { .. } | Error::Network(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %err, "request failed");
        }
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": [self.detail] }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn stream_feed(path: std::path::PathBuf) -> ApiResult<Response> {
    let file = tokio::fs::File::open(&path).await.map_err(Error::from)?;
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(RSS_CONTENT_TYPE),
    );
    Ok(response)
}

async fn get_feed(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<Response> {
    let path = state.reconciler.feeds().get(&source_id).await?;
    stream_feed(path).await
}

/// Rebuilds the feed from stored records without re-extracting.
async fn put_feed(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<Response> {
    state.reconciler.rebuild_feed(&source_id).await?;
    let path = state.reconciler.feeds().get(&source_id).await?;
    stream_feed(path).await
}

async fn delete_feed(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.reconciler.feeds().delete(&source_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn media(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let video = state.reconciler.store().get_video(&video_id).await?;
    let response = match state.proxy.resolve(&video, &method, &headers).await? {
        MediaResponse::Redirect(url) => Redirect::temporary(&url).into_response(),
        MediaResponse::Proxied(response) => response,
        MediaResponse::Pending => {
            (StatusCode::ACCEPTED, Json(json!({ "detail": [MEDIA_PENDING] }))).into_response()
        }
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct NewSource {
    pub url: String,
}

async fn list_sources(State(state): State<AppState>) -> ApiResult<Json<Vec<Source>>> {
    Ok(Json(state.reconciler.store().list_sources().await?))
}

async fn create_source(
    State(state): State<AppState>,
    Json(body): Json<NewSource>,
) -> ApiResult<(StatusCode, Json<SourceWithVideos>)> {
    let created = state
        .reconciler
        .create_source(&body.url, &state.owner_id)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_source(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<Json<SourceWithVideos>> {
    let store = state.reconciler.store();
    let source = store.get_source(&source_id).await?;
    let videos = store.list_videos_for_source(&source.id).await?;
    Ok(Json(SourceWithVideos { source, videos }))
}

async fn delete_source(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.reconciler.delete_source(&source_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_source(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<Json<SourceWithVideos>> {
    Ok(Json(state.reconciler.fetch_source(&source_id).await?))
}

async fn fetch_all_sources(State(state): State<AppState>) -> ApiResult<Json<RefreshReport>> {
    Ok(Json(state.reconciler.fetch_all_sources().await?))
}

async fn list_videos(State(state): State<AppState>) -> ApiResult<Json<Vec<Video>>> {
    Ok(Json(state.reconciler.store().list_videos().await?))
}

async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<Video>> {
    Ok(Json(state.reconciler.store().get_video(&video_id).await?))
}

async fn fetch_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<Video>> {
    Ok(Json(state.reconciler.fetch_video(&video_id).await?))
}
