//! Streaming strategies and the fallback between them.

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest_eventsource::{Event, EventSource};
use serde_json::Value;
use tracing::{debug, warn};

use super::chunk::{ChatChunk, ChunkMapper};
use crate::error::StrandError;
use crate::provider::capabilities::{StreamPlan, StreamStrategy};
use crate::provider::http::{parse_sse_line, status_to_error, SseLine};
use crate::provider::EventStream;
use crate::util::RetryPolicy;

/// Everything needed to (re)issue one streaming request.
#[derive(Clone)]
pub(super) struct StreamContext {
    pub client: reqwest::Client,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Value,
    pub retry: RetryPolicy,
}

/// Why a strategy stopped early.
#[derive(Debug)]
enum ChunkError {
    /// The response did not have the stream shape the strategy expects.
    Shape(String),
    Backend(StrandError),
}

type ChunkStream = BoxStream<'static, Result<ChatChunk, ChunkError>>;

/// Run `plan` and map chunks to events, ending with `Done`.
///
/// A shape failure before the first chunk switches to the fallback strategy
/// once. Any failure after a chunk was seen is returned as-is.
pub(super) fn event_stream(ctx: StreamContext, plan: StreamPlan) -> EventStream {
    Box::pin(async_stream::stream! {
        let mut mapper = ChunkMapper::default();
        let mut seen_chunk = false;
        let mut strategy = plan.preferred;
        let mut fallback = plan.fallback.filter(|f| *f != plan.preferred);

        loop {
            debug!(%strategy, url = %ctx.url, "opening chat stream");
            let mut chunks = open(&ctx, strategy);
            let mut failure = None;
            while let Some(item) = chunks.next().await {
                match item {
                    Ok(chunk) => {
                        seen_chunk = true;
                        for event in mapper.map(chunk) {
                            yield Ok(event);
                        }
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            match failure {
                None => break,
                Some(ChunkError::Shape(reason)) if !seen_chunk && fallback.is_some() => {
                    let next = fallback.take().unwrap_or(StreamStrategy::RawChunks);
                    warn!(%strategy, fallback = %next, %reason, "stream shape not recognized; falling back");
                    strategy = next;
                }
                Some(ChunkError::Shape(reason)) => {
                    yield Err(StrandError::Stream(reason));
                    return;
                }
                Some(ChunkError::Backend(err)) => {
                    yield Err(err);
                    return;
                }
            }
        }

        yield Ok(mapper.finish());
    })
}

fn open(ctx: &StreamContext, strategy: StreamStrategy) -> ChunkStream {
    match strategy {
        StreamStrategy::Managed => managed_chunks(ctx),
        StreamStrategy::RawChunks => raw_chunks(ctx.clone()),
    }
}

/// Strict event-source consumption.
fn managed_chunks(ctx: &StreamContext) -> ChunkStream {
    let request = ctx
        .client
        .post(&ctx.url)
        .headers(ctx.headers.clone())
        .json(&ctx.body);
    let mut source = match EventSource::new(request) {
        Ok(source) => source,
        Err(err) => {
            return stream::once(async move {
                Err(ChunkError::Backend(StrandError::Stream(err.to_string())))
            })
            .boxed()
        }
    };
    source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

    Box::pin(async_stream::stream! {
        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    if message.data.trim() == "[DONE]" {
                        break;
                    }
                    if !message.event.is_empty() && message.event != "message" {
                        yield Err(ChunkError::Shape(format!(
                            "unrecognized stream event '{}'",
                            message.event
                        )));
                        break;
                    }
                    match serde_json::from_str::<ChatChunk>(&message.data) {
                        Ok(chunk) => {
                            yield Ok(chunk);
                        }
                        Err(err) => {
                            yield Err(ChunkError::Shape(format!("undecodable chunk: {err}")));
                            break;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    yield Err(ChunkError::Backend(status_to_error(status.as_u16(), &body)));
                    break;
                }
                Err(reqwest_eventsource::Error::Transport(err)) => {
                    yield Err(ChunkError::Backend(StrandError::Network(err)));
                    break;
                }
                Err(other) => {
                    yield Err(ChunkError::Shape(other.to_string()));
                    break;
                }
            }
        }
        source.close();
    })
}

/// Lenient line-by-line parsing of `data:` chunks.
fn raw_chunks(ctx: StreamContext) -> ChunkStream {
    Box::pin(async_stream::stream! {
        let sent = ctx
            .retry
            .execute(|| {
                let request = ctx
                    .client
                    .post(&ctx.url)
                    .headers(ctx.headers.clone())
                    .json(&ctx.body);
                async move {
                    let response = request.send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(status_to_error(status.as_u16(), &body));
                    }
                    Ok(response)
                }
            })
            .await;
        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                yield Err(ChunkError::Backend(err));
                return;
            }
        };

        let byte_stream = response.bytes_stream();
        futures::pin_mut!(byte_stream);
        let mut buffer = String::new();

        while let Some(bytes) = byte_stream.next().await {
            let bytes = match bytes {
                Ok(bytes) => bytes,
                Err(err) => {
                    yield Err(ChunkError::Backend(StrandError::Network(err)));
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer.drain(..=line_end);

                match parse_sse_line(&line) {
                    SseLine::Done => return,
                    SseLine::Other => {}
                    SseLine::Data(data) => match serde_json::from_str::<ChatChunk>(data) {
                        Ok(chunk) => {
                            yield Ok(chunk);
                        }
                        Err(err) => debug!(error = %err, "skipping undecodable stream chunk"),
                    },
                }
            }
        }
    })
}
