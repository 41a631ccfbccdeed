use std::collections::HashMap;
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};

use crate::coordinator::{CoordinatorState, EngineInfo, ParameterSnapshot};
use crate::error::{FleetError, Result};
use crate::protocol::{
    Ack, ProgressReport, RegisterRequest, RegisterResponse, SetParametersResponse, UploadResponse,
};

const OCTET_STREAM: &str = "application/octet-stream";

fn remote_ip(connect: Option<ConnectInfo<SocketAddr>>) -> Option<String> {
    connect.map(|ConnectInfo(addr)| addr.ip().to_string())
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn register(
    State(state): State<CoordinatorState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Option<Json<RegisterRequest>>,
) -> Result<Json<RegisterResponse>> {
    let name = body.map(|Json(req)| req.name).unwrap_or_else(|| "unknown".to_string());
    let record = state.register(name, remote_ip(connect)).await?;
    Ok(Json(RegisterResponse {
        node_id: record.id.to_string(),
    }))
}

pub async fn get_parameters(State(state): State<CoordinatorState>) -> Json<ParameterSnapshot> {
    Json(state.params.read().await.snapshot())
}

/// Administrative update. Only active fields are read from the form.
pub async fn set_parameters(
    State(state): State<CoordinatorState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<SetParametersResponse>> {
    let mut store = state.params.write().await;
    let parameters = store.update(&form)?.clone();
    Ok(Json(SetParametersResponse {
        parameters,
        version: store.version(),
    }))
}

pub async fn progress(
    State(state): State<CoordinatorState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    Json(report): Json<ProgressReport>,
) -> Result<Json<Ack>> {
    state.report_progress(report, remote_ip(connect)).await?;
    Ok(Json(Ack::ok()))
}

/// Read the first multipart field named `file`, returning its filename and bytes.
async fn read_file_field(mut multipart: Multipart) -> Result<Option<(Option<String>, Bytes)>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let bytes = field.bytes().await?;
        return Ok(Some((filename, bytes)));
    }
    Ok(None)
}

pub async fn upload(
    State(state): State<CoordinatorState>,
    multipart: Multipart,
) -> Result<Response> {
    let Some((Some(filename), bytes)) = read_file_field(multipart).await? else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "no file" })),
        )
            .into_response());
    };
    let saved = state.artifacts.save(&filename, &bytes).await?;
    Ok(Json(UploadResponse {
        status: "saved".to_string(),
        filename: saved,
    })
    .into_response())
}

pub async fn download(
    State(state): State<CoordinatorState>,
    Path(filename): Path<String>,
) -> Result<Response> {
    let bytes = state.artifacts.read(&filename).await?;
    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, OCTET_STREAM.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

pub async fn download_engine(State(state): State<CoordinatorState>) -> Result<Response> {
    let registry = state.engine.read().await;
    let artifact = registry.current().ok_or(FleetError::NoEngineRegistered)?;
    Ok((
        [
            (header::CONTENT_TYPE, OCTET_STREAM.to_string()),
            (header::ETAG, format!("\"{}\"", artifact.hash)),
        ],
        artifact.bytes.clone(),
    )
        .into_response())
}

pub async fn engine_info(State(state): State<CoordinatorState>) -> Json<EngineInfo> {
    Json(state.engine.read().await.info())
}

/// Administrative engine replacement.
pub async fn upload_engine(
    State(state): State<CoordinatorState>,
    multipart: Multipart,
) -> Result<Response> {
    let Some((_, bytes)) = read_file_field(multipart).await? else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "no file" })),
        )
            .into_response());
    };
    if bytes.is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "empty engine binary" })),
        )
            .into_response());
    }

    let info = state.replace_engine(bytes).await?;
    Ok(Json(info).into_response())
}
