use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use hophop_core::config::EnvMap;
use hophop_core::proto::{ControlRequest, StatusSnapshot};
use hophop_rcon::DEFAULT_EXECUTE_TIMEOUT;

use crate::config::ConfigView;
use crate::context::SharedContext;
use crate::control::{self, ControlReply};
use crate::error::ApiError;
use crate::tasks::query_status;

pub async fn get_config(State(ctx): State<SharedContext>) -> Json<ConfigView> {
    Json(ctx.config.view())
}

pub async fn update_config(
    State(ctx): State<SharedContext>,
    body: Result<Json<EnvMap>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(values) = body?;
    let before = ctx.config.server_config();
    let config = ctx.config.update(values)?;
    info!(server_name = %config.server_name, "configuration updated");
    // The RCON client keeps the endpoint it was built with.
    let restart_required = before.rcon_host != config.rcon_host
        || before.rcon_port != config.rcon_port
        || before.rcon_password != config.rcon_password;
    if restart_required {
        warn!("RCON settings changed; they apply after the dashboard restarts");
    }
    Ok(Json(json!({ "status": "success", "restart_required": restart_required })))
}

#[derive(Debug, Deserialize)]
pub struct RconRequest {
    command: String,
}

pub async fn rcon_command(
    State(ctx): State<SharedContext>,
    body: Result<Json<RconRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body?;
    let command = req.command.trim();
    if command.is_empty() {
        return Err(ApiError::BadRequest("command must not be empty".into()));
    }
    let response = ctx.rcon.execute(command, DEFAULT_EXECUTE_TIMEOUT).await?;
    Ok(Json(json!({ "response": response })))
}

pub async fn server_status(State(ctx): State<SharedContext>) -> Json<StatusSnapshot> {
    Json(query_status(&ctx).await)
}

pub async fn server_control(
    State(ctx): State<SharedContext>,
    body: Result<Json<ControlRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body?;
    let message = match control::perform(&ctx, req.action).await? {
        ControlReply::Message(text) => Value::from(text),
        ControlReply::Status(status) => serde_json::to_value(status)
            .map_err(|err| ApiError::BadRequest(err.to_string()))?,
    };
    Ok(Json(json!({ "message": message })))
}

const DAEMON_LOG_LINES: usize = 200;

/// The dashboard's own recent log output.
pub async fn daemon_logs(State(ctx): State<SharedContext>) -> Json<Value> {
    let lines: Vec<String> = ctx
        .logs
        .tail_daemon(DAEMON_LOG_LINES)
        .into_iter()
        .map(|entry| entry.line)
        .collect();
    Json(json!({ "lines": lines }))
}
