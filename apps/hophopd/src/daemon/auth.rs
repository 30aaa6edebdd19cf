use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::context::SharedContext;
use crate::error::ApiError;

/// With a dashboard secret configured, every API call must carry
/// `Authorization: Bearer <secret>`.
pub async fn require_bearer(State(ctx): State<SharedContext>, req: Request, next: Next) -> Response {
    let Some(secret) = ctx.config.secret() else {
        return next.run(req).await;
    };
    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if presented.is_some_and(|token| token.trim() == secret) {
        next.run(req).await
    } else {
        ApiError::Unauthorized.into_response()
    }
}
