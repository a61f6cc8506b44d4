//! HTTP interface.
//!
//! Every JSON endpoint answers `200 OK` and reports failure through its
//! `response` field, which is `"okay"` on success and the error text
//! otherwise. Only the static media routes use status codes.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    Json,
    Router,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::{io::ReaderStream, sync::CancellationToken};

use crate::{
    caption::{self, CaptionClient},
    codec,
    error::{Error, Result},
    ingestion::{IngestReport, IngestState, IngestionCoordinator},
    search::{OKAY, QueryExecutor, QueryRequest, QueryResponse},
    static_cache::{ServedFile, StaticCache},
    walker::{self, MediaFile},
};

/// Shared state behind every handler.
pub struct AppState {
    pub executor: QueryExecutor,
    pub captioner: Arc<dyn CaptionClient>,
    pub ingestion: Arc<IngestionCoordinator>,
    pub images: StaticCache,
    pub videos: StaticCache,
    /// Cancelled on shutdown; background ingestion runs stop with it.
    pub shutdown: CancellationToken,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/caption", post(caption_image))
        .route("/all_images", get(all_images))
        .route("/all_videos", get(all_videos))
        .route("/ingest", post(ingest))
        .route("/status", get(status))
        .route("/images/{*path}", get(image_file))
        .route("/videos/{*path}", get(video_file))
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` is cancelled.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn query(
    State(state): State<Arc<AppState>>,
    request: std::result::Result<Json<QueryRequest>, JsonRejection>,
) -> Json<QueryResponse> {
    let result = match request {
        Ok(Json(request)) => state.executor.execute(request).await,
        Err(rejection) => Err(Error::QueryParse(rejection.body_text())),
    };
    if let Err(e) = &result {
        tracing::warn!("query failed: {e}");
    }
    Json(QueryResponse::from(result))
}

#[derive(Debug, Deserialize)]
struct CaptionRequest {
    image: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaptionReply {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

async fn caption_image(
    State(state): State<Arc<AppState>>,
    request: std::result::Result<Json<CaptionRequest>, JsonRejection>,
) -> Json<CaptionReply> {
    let result = match request {
        Ok(Json(request)) => {
            // Run on its own task so a slow model never holds this one.
            let captioner = Arc::clone(&state.captioner);
            tokio::spawn(async move {
                let image = codec::decode_image_payload(&request.image)?;
                caption::caption_one(captioner.as_ref(), image).await
            })
            .await
            .unwrap_or_else(|e| Err(Error::Io(std::io::Error::other(e))))
        }
        Err(rejection) => Err(Error::Decode(rejection.body_text())),
    };

    Json(match result {
        Ok(caption) => CaptionReply {
            response: OKAY.to_string(),
            caption: Some(caption),
        },
        Err(e) => {
            tracing::warn!("caption request failed: {e}");
            CaptionReply {
                response: e.to_string(),
                caption: None,
            }
        }
    })
}

/// `{"response": [filename, ...]}`, or `{"response": "<error>"}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListingReply {
    pub response: Listing,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Listing {
    Files(Vec<String>),
    Error(String),
}

async fn all_images(State(state): State<Arc<AppState>>) -> Json<ListingReply> {
    list_media(state.images.root().to_path_buf(), walker::list_images).await
}

async fn all_videos(State(state): State<Arc<AppState>>) -> Json<ListingReply> {
    list_media(state.videos.root().to_path_buf(), walker::list_videos).await
}

async fn list_media(
    root: PathBuf,
    list: fn(&std::path::Path) -> Result<Vec<MediaFile>>,
) -> Json<ListingReply> {
    let result = tokio::task::spawn_blocking(move || list(&root))
        .await
        .unwrap_or_else(|e| Err(Error::Io(std::io::Error::other(e))));

    Json(ListingReply {
        response: match result {
            Ok(files) => {
                Listing::Files(files.iter().map(MediaFile::filename).collect())
            }
            Err(e) => Listing::Error(e.to_string()),
        },
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReply {
    pub response: String,
    pub state: IngestState,
    pub last_report: Option<IngestReport>,
}

async fn ingest(State(state): State<Arc<AppState>>) -> Json<StatusReply> {
    let response = match state.ingestion.spawn(state.shutdown.child_token()) {
        Ok(_) => OKAY.to_string(),
        Err(e) => e.to_string(),
    };
    Json(StatusReply {
        response,
        state: state.ingestion.state(),
        last_report: state.ingestion.last_report(),
    })
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusReply> {
    Json(StatusReply {
        response: OKAY.to_string(),
        state: state.ingestion.state(),
        last_report: state.ingestion.last_report(),
    })
}

async fn image_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Response {
    serve_file(&state.images, &path).await
}

async fn video_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Response {
    serve_file(&state.videos, &path).await
}

async fn serve_file(cache: &StaticCache, path: &str) -> Response {
    match cache.get(path).await {
        Ok(ServedFile::Cached(file)) => {
            ([(header::CONTENT_TYPE, file.content_type)], file.bytes)
                .into_response()
        }
        Ok(ServedFile::Streamed { file, content_type }) => {
            let body = Body::from_stream(ReaderStream::new(file));
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(Error::NotFound { .. }) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::warn!(path, "failed to serve file: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
