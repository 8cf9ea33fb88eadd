//! REST surface of the block store.
//!
//! | method   | path                    | result                         |
//! |----------|-------------------------|--------------------------------|
//! | `GET`    | `/api/v1/blocker`       | greeting, unauthenticated      |
//! | `PUT`    | `/api/v1/blocker`       | 201 + manifest from raw body   |
//! | `POST`   | `/api/v1/blocker`       | 201 + manifest from first file |
//! | `GET`    | `/api/v1/blocker/:id`   | reconstructed bytes            |
//! | `DELETE` | `/api/v1/blocker/:id`   | 204                            |
//! | `COPY`   | `/api/v1/blocker/:id`   | 200 + new manifest             |

use crate::auth::require_signature;
use crate::error::ApiError;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, put};
use axum::{middleware, Json, Router};
use blocker_core::{BlockEngine, BlockedFile, FileMeta};
use futures::StreamExt;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Collection path.
pub const COLLECTION: &str = "/api/v1/blocker";

/// Body of the health endpoint.
pub const GREETING: &str = "Server: Blocker";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The block engine
    pub engine: BlockEngine,
    /// Signing secret; `None` disables authentication
    pub shared_key: Option<Arc<[u8]>>,
}

impl AppState {
    /// State for `engine`, signing with `shared_key` when present.
    pub fn new(engine: BlockEngine, shared_key: Option<Vec<u8>>) -> Self {
        Self {
            engine,
            shared_key: shared_key.map(Arc::from),
        }
    }
}

/// Limits applied to every request.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Per-request deadline
    pub timeout: Duration,
    /// Largest accepted body
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_body_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Build the router with authentication, tracing, timeout and body limits.
pub fn router(state: AppState, limits: Limits) -> Router {
    if state.shared_key.is_none() {
        tracing::warn!("shared key not configured, requests are not authenticated");
    }

    let signed = middleware::from_fn_with_state(state.clone(), require_signature);

    Router::new()
        .route(
            COLLECTION,
            get(health).merge(
                put(upload_raw)
                    .post(upload_multipart)
                    .route_layer(signed.clone()),
            ),
        )
        .route(
            &format!("{COLLECTION}/:id"),
            any(blocked_file).route_layer(signed),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(limits.max_body_bytes))
                .layer(RequestBodyLimitLayer::new(limits.max_body_bytes))
                .layer(TimeoutLayer::new(limits.timeout)),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    GREETING
}

/// Copy a request body into an anonymous temp file the engine can seek.
struct Spool {
    file: tokio::fs::File,
    written: u64,
}

impl Spool {
    async fn new() -> Result<Self, ApiError> {
        let file = tokio::task::spawn_blocking(tempfile::tempfile)
            .await
            .map_err(std::io::Error::other)??;
        Ok(Self {
            file: tokio::fs::File::from_std(file),
            written: 0,
        })
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), ApiError> {
        self.file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn block(mut self, engine: &BlockEngine, meta: FileMeta) -> Result<BlockedFile, ApiError> {
        self.file.flush().await?;
        self.file.seek(SeekFrom::Start(0)).await?;
        info!(bytes = self.written, name = ?meta.name, "upload spooled");
        Ok(engine.block_stream(&mut self.file, meta).await?)
    }
}

fn created(file: BlockedFile) -> Response {
    (StatusCode::CREATED, Json(file)).into_response()
}

async fn upload_raw(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let mut spool = Spool::new().await?;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ApiError::BadRequest(e.to_string()))?;
        spool.write(&chunk).await?;
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let meta = FileMeta {
        name: None,
        content_type,
    };
    Ok(created(spool.block(&state.engine, meta).await?))
}

async fn upload_multipart(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    while let Some(mut field) = multipart.next_field().await? {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let meta = FileMeta {
            name: Some(name),
            content_type: field.content_type().map(str::to_string),
        };

        let mut spool = Spool::new().await?;
        while let Some(chunk) = field.chunk().await? {
            spool.write(&chunk).await?;
        }
        return Ok(created(spool.block(&state.engine, meta).await?));
    }
    Err(ApiError::BadRequest("no file part in form".into()))
}

async fn blocked_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
) -> Result<Response, ApiError> {
    match method.as_str() {
        "GET" => download(&state.engine, &id).await,
        "DELETE" => {
            state.engine.delete_blocked_file(&id).await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        "COPY" => {
            let copy = state.engine.copy_blocked_file(&id).await?;
            Ok((StatusCode::OK, Json(copy)).into_response())
        }
        _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    }
}

async fn download(engine: &BlockEngine, id: &str) -> Result<Response, ApiError> {
    let (file, chunks) = engine.unblock_stream(id).await?;
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, file.length);
    if let Some(name) = file.name.as_deref().filter(|n| !n.contains('"')) {
        response = response.header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{name}\""),
        );
    }
    Ok(response.body(Body::from_stream(chunks))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use blocker_core::crypto::{signing, LocalCipher};
    use blocker_core::meta::{MemoryBlockInfoStore, MemoryManifestStore};
    use blocker_core::storage::MemoryChunkStore;
    use blocker_core::{EncryptionAlgorithm, EncryptionKey, EngineConfig};
    use tower::ServiceExt;

    const KEY: &[u8] = b"test-shared-key";

    fn engine() -> BlockEngine {
        BlockEngine::new(
            EngineConfig {
                chunk_size: 1024,
                ..EngineConfig::default()
            },
            Arc::new(MemoryChunkStore::new()),
            Arc::new(MemoryBlockInfoStore::new()),
            Arc::new(MemoryManifestStore::new()),
            Some(Arc::new(LocalCipher::new(
                EncryptionKey::generate(),
                EncryptionAlgorithm::AesGcm256,
            ))),
        )
        .unwrap()
    }

    fn app(shared_key: Option<&[u8]>) -> Router {
        router(
            AppState::new(engine(), shared_key.map(<[u8]>::to_vec)),
            Limits::default(),
        )
    }

    fn signed(method: &str, path: &str, body: Body) -> Request<Body> {
        let date = signing::request_date(chrono::Utc::now());
        let auth = signing::sign(KEY, method, &date, path).unwrap();
        Request::builder()
            .method(method)
            .uri(path)
            .header("x-blocker-date", date)
            .header(header::AUTHORIZATION, auth)
            .body(body)
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn upload(app: &Router, data: &[u8]) -> BlockedFile {
        let response = app
            .clone()
            .oneshot(signed("PUT", COLLECTION, Body::from(data.to_vec())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint_needs_no_signature() {
        let request = Request::builder().uri(COLLECTION).body(Body::empty()).unwrap();
        let response = app(Some(KEY)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, GREETING.as_bytes());
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let app = app(Some(KEY));
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let file = upload(&app, &data).await;
        assert_eq!(file.length, 5000);
        assert_eq!(file.blocks.len(), 5);

        let path = format!("{COLLECTION}/{}", file.id);
        let response = app.oneshot(signed("GET", &path, Body::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(body_bytes(response).await, data);
    }

    #[tokio::test]
    async fn test_manifest_json_shape() {
        let app = app(Some(KEY));
        let response = app
            .oneshot(signed("PUT", COLLECTION, Body::from("hello")))
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(json["id"].is_string());
        assert_eq!(
            json["fileHash"],
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(json["length"], 5);
        assert_eq!(json["blocks"][0]["position"], 1);
        assert_eq!(json["blocks"][0]["hash"], json["fileHash"]);
    }

    #[tokio::test]
    async fn test_copy_then_delete() {
        let app = app(Some(KEY));
        let file = upload(&app, b"copy me").await;
        let path = format!("{COLLECTION}/{}", file.id);

        let response = app
            .clone()
            .oneshot(signed("COPY", &path, Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let copy: BlockedFile = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_ne!(copy.id, file.id);
        assert_eq!(copy.blocks, file.blocks);

        let response = app
            .clone()
            .oneshot(signed("DELETE", &path, Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(signed("GET", &path, Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let copy_path = format!("{COLLECTION}/{}", copy.id);
        let response = app
            .oneshot(signed("GET", &copy_path, Body::empty()))
            .await
            .unwrap();
        assert_eq!(body_bytes(response).await, b"copy me");
    }

    #[tokio::test]
    async fn test_unknown_id_is_404() {
        let path = format!("{COLLECTION}/missing");
        let response = app(Some(KEY))
            .oneshot(signed("DELETE", &path, Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_signature_is_401() {
        let request = Request::builder()
            .method("PUT")
            .uri(COLLECTION)
            .header("x-blocker-date", signing::request_date(chrono::Utc::now()))
            .header(header::AUTHORIZATION, "bm90IGEgc2lnbmF0dXJl")
            .body(Body::from("data"))
            .unwrap();
        let response = app(Some(KEY)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signature_bound_to_path() {
        let app = app(Some(KEY));
        let file = upload(&app, b"bound").await;
        let mut request = signed("GET", &format!("{COLLECTION}/other"), Body::empty());
        *request.uri_mut() = format!("{COLLECTION}/{}", file.id).parse().unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_no_key_allows_unsigned() {
        let app = app(None);
        let request = Request::builder()
            .method("PUT")
            .uri(COLLECTION)
            .body(Body::from("open"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_multipart_upload_takes_first_file() {
        let app = app(Some(KEY));
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"note\"\r\n\r\n\
             ignored\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             first file\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"b.txt\"\r\n\r\n\
             second file\r\n\
             --{boundary}--\r\n"
        );
        let mut request = signed("POST", COLLECTION, Body::from(body));
        request.headers_mut().insert(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}")
                .parse()
                .unwrap(),
        );

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let file: BlockedFile = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(file.name.as_deref(), Some("a.txt"));
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(file.length, 10);

        let path = format!("{COLLECTION}/{}", file.id);
        let response = app.oneshot(signed("GET", &path, Body::empty())).await.unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"a.txt\""
        );
        assert_eq!(body_bytes(response).await, b"first file");
    }

    #[tokio::test]
    async fn test_unsupported_method_on_item() {
        let path = format!("{COLLECTION}/x");
        let response = app(Some(KEY))
            .oneshot(signed("PATCH", &path, Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
