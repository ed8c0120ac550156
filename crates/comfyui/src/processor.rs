//! WebSocket frame processing.
//!
//! Turns the raw frames of a ComfyUI WebSocket connection into a stream of
//! [`BackendEvent`]s. The stream ends when the socket closes or errors;
//! frames that fail to parse are logged and skipped.

use futures::stream::{self, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::backend::EventStream;
use crate::messages::{parse_event, BackendEvent};

/// Adapt a WebSocket frame stream into a stream of parsed events.
///
/// Binary frames carry preview images and are ignored. Ping/pong is
/// handled by tungstenite.
pub fn event_stream<S>(ws: S, client_id: String) -> EventStream
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Send + Unpin + 'static,
{
    stream::unfold((ws, client_id), |(mut ws, client_id)| async move {
        loop {
            match ws.next().await? {
                Ok(Message::Text(text)) => {
                    if let Some(event) = handle_text_frame(&text, &client_id) {
                        return Some((event, (ws, client_id)));
                    }
                }
                Ok(Message::Binary(_)) => {
                    tracing::trace!(client_id = %client_id, "Ignoring binary message (preview image)");
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    tracing::info!(client_id = %client_id, ?frame, "ComfyUI WebSocket closed");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(client_id = %client_id, error = %e, "WebSocket receive error");
                    return None;
                }
            }
        }
    })
    .boxed()
}

fn handle_text_frame(text: &str, client_id: &str) -> Option<BackendEvent> {
    match parse_event(text) {
        Ok(event) => {
            tracing::trace!(client_id = %client_id, kind = %event.kind, "ComfyUI event");
            Some(event)
        }
        Err(e) => {
            tracing::warn!(
                client_id = %client_id,
                error = %e,
                raw_message = %text,
                "Failed to parse ComfyUI message",
            );
            None
        }
    }
}
