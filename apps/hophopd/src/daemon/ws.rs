use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use hophop_core::proto::{ClientMessage, DashboardEvent};

use crate::context::SharedContext;
use crate::tasks::{broadcast_status, query_status};

pub async fn upgrade(ws: WebSocketUpgrade, State(ctx): State<SharedContext>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(socket, ctx))
}

async fn send_event(sink: &mut SplitSink<WebSocket, Message>, event: &DashboardEvent) -> bool {
    let Ok(text) = serde_json::to_string(event) else {
        return true;
    };
    sink.send(Message::Text(text)).await.is_ok()
}

async fn client_session(socket: WebSocket, ctx: SharedContext) {
    let (mut sink, mut stream) = socket.split();
    let mut events = ctx.subscribe();
    debug!("dashboard client connected");

    let console = ctx.console();
    if !console.is_empty() && !send_event(&mut sink, &DashboardEvent::ScreenOutput(console)).await {
        return;
    }
    let status = DashboardEvent::ServerStatus(query_status(&ctx).await);
    if !send_event(&mut sink, &status).await {
        return;
    }

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if !send_event(&mut sink, &event).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "dashboard client lagging"),
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::RequestStatus) => broadcast_status(&ctx).await,
                    Err(err) => debug!("ignoring client message: {err}"),
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    let _ = sink.close().await;
    debug!("dashboard client disconnected");
}
