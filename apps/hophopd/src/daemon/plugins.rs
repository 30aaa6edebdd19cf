use axum::Json;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Multipart, Path, State};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use hophop_core::proto::{PluginDescriptor, PluginFileKind};
use hophop_provision::{PluginStore, ProvisionError};

use crate::context::SharedContext;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ContentRequest {
    name: String,
    content: String,
    #[serde(rename = "type")]
    kind: PluginFileKind,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    name: String,
    activate: bool,
}

#[derive(Debug, Deserialize)]
pub struct NameRequest {
    name: String,
}

/// Runs a store operation on the blocking pool; the store does plain file I/O.
async fn with_store<T, F>(ctx: &SharedContext, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&PluginStore) -> Result<T, ProvisionError> + Send + 'static,
{
    let store = ctx.plugins.clone();
    Ok(tokio::task::spawn_blocking(move || op(&store)).await??)
}

pub async fn list(State(ctx): State<SharedContext>) -> Result<Json<Value>, ApiError> {
    let plugins: Vec<PluginDescriptor> = with_store(&ctx, |store| store.list()).await?;
    Ok(Json(json!({ "plugins": plugins })))
}

pub async fn read(
    State(ctx): State<SharedContext>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path((name, kind)) = path?;
    let kind: PluginFileKind = kind.parse()?;
    let content = with_store(&ctx, move |store| store.read(&name, kind)).await?;
    Ok(Json(json!({ "content": content })))
}

pub async fn write(
    State(ctx): State<SharedContext>,
    body: Result<Json<ContentRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body?;
    let ContentRequest { name, content, kind } = req;
    let plugin = name.clone();
    with_store(&ctx, move |store| store.write(&name, kind, &content)).await?;
    info!(%plugin, ?kind, "plugin file saved");
    Ok(Json(json!({ "status": "success" })))
}

pub async fn upload(
    State(ctx): State<SharedContext>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let mut multipart = multipart?;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("uploaded file has no name".into()))?;
        let bytes = field.bytes().await?;
        let plugin = with_store(&ctx, move |store| store.upload(&file_name, &bytes)).await?;
        info!(%plugin, "plugin uploaded");
        return Ok(Json(json!({ "plugin": plugin })));
    }
    Err(ApiError::BadRequest("no file part in upload".into()))
}

pub async fn toggle(
    State(ctx): State<SharedContext>,
    body: Result<Json<ToggleRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body?;
    let name = req.name.clone();
    let active = with_store(&ctx, move |store| store.toggle(&name, req.activate)).await?;
    let message = if active {
        format!("Plugin {} activated", req.name)
    } else {
        format!("Plugin {} deactivated", req.name)
    };
    info!("{message}");
    Ok(Json(json!({ "message": message, "active": active })))
}

pub async fn delete(
    State(ctx): State<SharedContext>,
    body: Result<Json<NameRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body?;
    let name = req.name.clone();
    with_store(&ctx, move |store| store.delete(&name)).await?;
    info!(plugin = %req.name, "plugin deleted");
    Ok(Json(json!({ "message": format!("Plugin {} deleted", req.name) })))
}
