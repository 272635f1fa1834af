//! The chat-completions endpoint.

use super::convert::{semantic_hit_response, to_api_response, to_domain_chat_request};
use super::schemas::{stream_chunk, stream_error, ChatCompletionRequest};
use crate::error::GatewayError;
use crate::pipeline::{ChunkStream, PipelineReply, StreamEvent};
use crate::state::AppState;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderValue;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::convert::Infallible;
use std::net::SocketAddr;

/// `POST /v1/chat/completions`.
///
/// Non-streaming requests run the full pipeline and return one JSON body.
/// With `stream: true` the response is `text/event-stream`, one
/// `data: {json}` frame per content delta, terminated by `data: [DONE]` or
/// a final error frame if the upstream dies mid-stream.
pub async fn chat_completions(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<ChatCompletionRequest>,
) -> Result<Response, GatewayError> {
    body.validate()?;
    let client_id = addr.ip().to_string();
    let mut request = to_domain_chat_request(&body);

    if body.stream {
        let chunks = state.pipeline.stream(request, &client_id).await?;
        return Ok(sse_response(chunks));
    }

    let reply = state.pipeline.execute(&mut request, &client_id).await?;
    let api_response = match reply {
        PipelineReply::Fresh(response) | PipelineReply::CachedExact(response) => {
            to_api_response(&response)
        }
        PipelineReply::CachedSemantic { content, model, .. } => {
            semantic_hit_response(request.id, &model, &content)
        }
    };

    let mut response = Json(api_response).into_response();
    if let Some(limiter) = &state.rate_limiter {
        let remaining = limiter.get_remaining(&client_id).await;
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-limit", HeaderValue::from(limiter.max_requests()));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    }
    Ok(response)
}

/// Render a [`ChunkStream`] as an SSE response. The stream ends after the
/// `[DONE]` marker or an error frame; dropping it (client disconnect)
/// cancels the upstream.
fn sse_response(chunks: ChunkStream) -> Response {
    let stream = futures::stream::unfold(Some(chunks), |state| async move {
        let mut chunks = state?;
        match chunks.next().await {
            None => None,
            Some(StreamEvent::Chunk(content)) => {
                let event = Event::default().data(stream_chunk(&content).to_string());
                Some((Ok::<_, Infallible>(event), Some(chunks)))
            }
            Some(StreamEvent::Done) => Some((Ok(Event::default().data("[DONE]")), None)),
            Some(StreamEvent::Failed(err)) => {
                let frame = stream_error(&err.to_string(), super::error_kind(&err));
                Some((Ok(Event::default().data(frame.to_string())), None))
            }
        }
    });
    Sse::new(stream).into_response()
}
