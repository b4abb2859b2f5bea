//! HTTP request handlers for the upload API

use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Body, Frame};
use hyper::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, SERVER};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::fmt::Display;
use std::io;
use std::result::Result;
use std::sync::Arc;
use std::time::SystemTime;
use stitch_core::*;
use stitch_engine::UploadStore;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, error, info, warn};

use crate::error::ApiError;

pub type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;

const SERVER_NAME: &str = concat!("stitch/", env!("CARGO_PKG_VERSION"));
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const DOWNLOAD_FRAME_SIZE: usize = 64 * 1024;

/// Routes understood by the server. Path parameters are left unparsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Status,
    Prepare,
    AddChunk { id: &'a str, number: &'a str },
    Finalize { id: &'a str },
    Download { id: &'a str },
    Info { id: &'a str },
}

impl<'a> Route<'a> {
    pub fn resolve(method: &Method, path: &'a str) -> Option<Self> {
        let segments: Vec<&'a str> = path.trim_matches('/').split('/').collect();

        let route = match (method, segments.as_slice()) {
            (&Method::GET, ["status"]) => Route::Status,
            (&Method::POST, ["file", "prepare"]) => Route::Prepare,
            (&Method::POST, ["file", "add-chunk", id, number]) => Route::AddChunk { id: *id, number: *number },
            (&Method::POST, ["file", "finalize", id]) => Route::Finalize { id: *id },
            (&Method::GET, ["file", "download", id]) => Route::Download { id: *id },
            (&Method::GET, ["file", id]) => Route::Info { id: *id },
            _ => return None,
        };
        Some(route)
    }
}

#[derive(Debug, Deserialize)]
struct PrepareRequest {
    name: String,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub id: String,
}

/// Upload description as returned to clients
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadView {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub state: UploadState,
    pub chunk_count: usize,
    pub size: u64,
    pub digest: Option<String>,
    pub created_at: String,
    pub finalized_at: Option<String>,
}

impl From<&UploadInfo> for UploadView {
    fn from(info: &UploadInfo) -> Self {
        UploadView {
            id: info.id.to_string(),
            name: info.name.clone(),
            content_type: info.content_type.clone(),
            state: info.state,
            chunk_count: info.chunk_count,
            size: info.size,
            digest: info.digest.map(|d| d.to_hex()),
            created_at: rfc3339(info.created_at),
            finalized_at: info.finalized_at.map(rfc3339),
        }
    }
}

fn rfc3339(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time).to_rfc3339()
}

/// Main request handler
pub async fn handle_request<B>(
    req: Request<B>,
    store: Arc<UploadStore>,
) -> Result<Response<ResponseBody>, Infallible>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("Handling {} {}", method, path);

    let response = match dispatch(req, &method, &path, &store).await {
        Ok(response) => response,
        Err(e) => error_response(&method, &path, &e),
    };

    info!("{} {} -> {}", method, path, response.status());
    Ok(response)
}

async fn dispatch<B>(
    req: Request<B>,
    method: &Method,
    path: &str,
    store: &UploadStore,
) -> Result<Response<ResponseBody>, ApiError>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Display,
{
    let route =
        Route::resolve(method, path).ok_or_else(|| ApiError::NoRoute(format!("{} {}", method, path)))?;

    match route {
        Route::Status => Ok(plain_response(StatusCode::OK, "ok")),
        Route::Prepare => handle_prepare(req, store).await,
        Route::AddChunk { id, number } => handle_add_chunk(req, store, id, number).await,
        Route::Finalize { id } => handle_finalize(store, id).await,
        Route::Download { id } => handle_download(store, id).await,
        Route::Info { id } => handle_info(store, id).await,
    }
}

async fn handle_prepare<B>(req: Request<B>, store: &UploadStore) -> Result<Response<ResponseBody>, ApiError>
where
    B: Body,
    B::Error: Display,
{
    let body = read_body(req).await?;
    let request: PrepareRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid prepare request: {}", e)))?;

    let content_type = request
        .content_type
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    let id = store.register(request.name, content_type).await?;
    json_response(StatusCode::OK, &PrepareResponse { id: id.to_string() })
}

async fn handle_add_chunk<B>(
    req: Request<B>,
    store: &UploadStore,
    id: &str,
    number: &str,
) -> Result<Response<ResponseBody>, ApiError>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Display,
{
    let id: UploadId = id.parse()?;
    let index: ChunkIndex = number
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid chunk number: {}", number)))?;

    // The body goes straight to the backend; it is never buffered whole
    let chunk = StreamReader::new(
        req.into_body()
            .into_data_stream()
            .map_err(|e| io::Error::other(e.to_string())),
    );
    store.append_chunk(&id, index, chunk).await?;

    debug!(upload = %id, index, "Chunk accepted");
    Ok(plain_response(StatusCode::CREATED, ""))
}

async fn handle_finalize(store: &UploadStore, id: &str) -> Result<Response<ResponseBody>, ApiError> {
    let id: UploadId = id.parse()?;
    store.finalize(&id).await?;

    let info = store.info(&id).await?;
    json_response(StatusCode::OK, &UploadView::from(&info))
}

async fn handle_download(store: &UploadStore, id: &str) -> Result<Response<ResponseBody>, ApiError> {
    let id: UploadId = id.parse()?;
    let (info, stream) = store.read(&id).await?;

    let frames = ReaderStream::with_capacity(stream, DOWNLOAD_FRAME_SIZE)
        .inspect_err(move |e| warn!("Download of {} interrupted: {}", id, e))
        .map_ok(Frame::data);

    let mut response = Response::new(StreamBody::new(frames).boxed_unsync());
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&info.content_type).unwrap_or(HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(info.size));
    headers.insert(CONTENT_DISPOSITION, attachment_disposition(&info.name));
    headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    Ok(response)
}

async fn handle_info(store: &UploadStore, id: &str) -> Result<Response<ResponseBody>, ApiError> {
    let id: UploadId = id.parse()?;
    let info = store.info(&id).await?;
    json_response(StatusCode::OK, &UploadView::from(&info))
}

async fn read_body<B>(req: Request<B>) -> Result<Bytes, ApiError>
where
    B: Body,
    B::Error: Display,
{
    let collected = req
        .into_body()
        .collect()
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read request body: {}", e)))?;
    Ok(collected.to_bytes())
}

/// `attachment; filename="..."` with anything unsafe for a quoted header value replaced
fn attachment_disposition(name: &str) -> HeaderValue {
    let safe: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", safe))
        .unwrap_or(HeaderValue::from_static("attachment"))
}

fn plain_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(body.into()).map_err(|never| match never {}).boxed_unsync());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response.headers_mut().insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    response
}

fn json_response(status: StatusCode, value: &impl Serialize) -> Result<Response<ResponseBody>, ApiError> {
    let body = serde_json::to_vec(value)
        .map_err(|e| StitchError::storage("failed to encode response", e))?;

    let mut response = plain_response(status, body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

fn error_response(method: &Method, path: &str, err: &ApiError) -> Response<ResponseBody> {
    let status = err.status();
    if status.is_server_error() {
        error!("Handler error for {} {}: {}", method, path, err);
    } else {
        warn!("Rejected {} {}: {}", method, path, err);
    }

    let body = json!({ "error": err.code(), "message": err.to_string() }).to_string();
    let mut response = plain_response(status, body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
