//! The stream coordinator (§4.G).
//!
//! Spawns one producer task that reads upstream bytes, hands each event
//! to the provider adapter for parsing, wraps it with a monotonically
//! increasing `ChunkIndex`, runs it through the plugin pipeline's
//! `StreamChunkHook`, and publishes it on a bounded output channel. The
//! consumer end never talks to the upstream source directly.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::plugin::PluginPipeline;
use crate::provider::{ByteStream, ProviderAdapter};
use crate::request::Request;
use crate::response::{ExtraFields, StreamChunk};

/// The consumer-facing half of a coordinated stream.
pub type StreamReceiver = tokio::sync::mpsc::Receiver<StreamChunk>;

/// Minimum output channel capacity (§4.G step 1).
pub const MIN_BUFFER: usize = 16;

/// Starts the producer task and returns the receiving end. `base_extra`
/// seeds `provider`/`model`/key-selection fields that every chunk
/// carries; the coordinator only fills in `chunk_index` and timing.
pub fn coordinate(
    adapter: Arc<dyn ProviderAdapter>,
    request: Arc<Request>,
    plugins: Arc<PluginPipeline>,
    mut upstream: ByteStream,
    base_extra: ExtraFields,
    buffer_size: usize,
    cancellation: CancellationToken,
) -> StreamReceiver {
    let (tx, rx) = tokio::sync::mpsc::channel(buffer_size.max(MIN_BUFFER));

    tokio::spawn(async move {
        let mut index: u64 = 0;
        let started_at = std::time::Instant::now();

        loop {
            let event: Option<Bytes> = tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    let mut extra = base_extra.clone();
                    extra.chunk_index = Some(index);
                    let chunk = StreamChunk::error(
                        index,
                        DispatchError::canceled("stream canceled"),
                        extra,
                    );
                    let _ = run_and_send(&plugins, &request, chunk, &tx).await;
                    return;
                }
                event = upstream.recv() => event,
            };

            let Some(event) = event else {
                let mut extra = base_extra.clone();
                extra.chunk_index = Some(index);
                extra.latency_ms = started_at.elapsed().as_millis() as u64;
                let chunk = StreamChunk::end(index, extra);
                let _ = run_and_send(&plugins, &request, chunk, &tx).await;
                return;
            };

            let parsed = adapter.parse_stream_event(&request, &event);
            match parsed {
                Ok(Some(payload)) => {
                    let mut extra = base_extra.clone();
                    extra.chunk_index = Some(index);
                    if index == 0 {
                        extra.latency_ms = started_at.elapsed().as_millis() as u64;
                    }
                    let chunk = StreamChunk::data(index, payload, extra);
                    if run_and_send(&plugins, &request, chunk, &tx).await.is_err() {
                        return;
                    }
                    index += 1;
                }
                Ok(None) => continue,
                Err(err) => {
                    let mut extra = base_extra.clone();
                    extra.chunk_index = Some(index);
                    let chunk = StreamChunk::error(index, err, extra);
                    let _ = run_and_send(&plugins, &request, chunk, &tx).await;
                    return;
                }
            }
        }
    });

    rx
}

/// Runs the chunk through `StreamChunkHook` (in reverse plugin order,
/// same as `PostHook`) and sends it downstream. Returns `Err` if the
/// consumer has gone away.
async fn run_and_send(
    plugins: &PluginPipeline,
    request: &Request,
    mut chunk: StreamChunk,
    tx: &tokio::sync::mpsc::Sender<StreamChunk>,
) -> Result<(), ()> {
    if let Err(err) = plugins.run_stream_chunk(request, &mut chunk).await {
        let extra = chunk.extra.clone();
        let index = chunk.index;
        let _ = tx.send(StreamChunk::error(index, err, extra)).await;
        return Err(());
    }
    tx.send(chunk).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Key, ProviderConfig};
    use crate::request::RequestType;
    use crate::response::StreamChunkKind;
    use async_trait::async_trait;

    struct EchoAdapter;

    #[async_trait]
    impl ProviderAdapter for EchoAdapter {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn allowed_requests(&self) -> &'static [RequestType] {
            &[RequestType::ChatCompletionStream]
        }
        async fn build_request(
            &self,
            _config: &ProviderConfig,
            _key: &Key,
            _request: &Request,
        ) -> Result<crate::provider::UpstreamHttpRequest, DispatchError> {
            unimplemented!()
        }
        fn parse_response(
            &self,
            _request: &Request,
            _status: u16,
            _body: &Bytes,
        ) -> Result<crate::response::Response, DispatchError> {
            unimplemented!()
        }
        fn parse_stream_event(
            &self,
            _request: &Request,
            event: &Bytes,
        ) -> Result<Option<serde_json::Value>, DispatchError> {
            Ok(Some(serde_json::json!({ "text": String::from_utf8_lossy(event) })))
        }
    }

    fn make_request() -> Arc<Request> {
        Arc::new(Request::new(
            RequestType::ChatCompletionStream,
            "echo",
            "model",
            serde_json::Value::Null,
        ))
    }

    #[tokio::test]
    async fn three_chunks_then_a_synthetic_end_chunk() {
        let (upstream_tx, upstream_rx) = tokio::sync::mpsc::channel(8);
        for word in ["a", "b", "c"] {
            upstream_tx.send(Bytes::from(word)).await.unwrap();
        }
        drop(upstream_tx);

        let mut rx = coordinate(
            Arc::new(EchoAdapter),
            make_request(),
            Arc::new(PluginPipeline::new()),
            upstream_rx,
            ExtraFields::default(),
            16,
            CancellationToken::new(),
        );

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            let is_terminal = chunk.is_terminal();
            chunks.push(chunk);
            if is_terminal {
                break;
            }
        }

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3].index, 3);
        assert!(matches!(chunks[3].kind, StreamChunkKind::End));
        for (i, chunk) in chunks[..3].iter().enumerate() {
            assert_eq!(chunk.index, i as u64);
            assert!(matches!(chunk.kind, StreamChunkKind::Data(_)));
        }
    }

    #[tokio::test]
    async fn cancellation_yields_a_canceled_error_chunk() {
        let (_upstream_tx, upstream_rx) = tokio::sync::mpsc::channel::<Bytes>(8);
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let mut rx = coordinate(
            Arc::new(EchoAdapter),
            make_request(),
            Arc::new(PluginPipeline::new()),
            upstream_rx,
            ExtraFields::default(),
            16,
            cancellation,
        );

        let chunk = rx.recv().await.unwrap();
        match chunk.kind {
            StreamChunkKind::Error(err) => assert_eq!(err.kind, crate::error::ErrorKind::Canceled),
            _ => panic!("expected an error chunk"),
        }
    }
}
