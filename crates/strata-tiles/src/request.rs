//! The two-stage content request pipeline.
//!
//! A request first fetches bytes through a [`ByteFetcher`]. That stage is
//! wrapped in [`futures::future::Abortable`] so the tileset can cancel it when
//! the tile leaves view. Once bytes arrive the payload is tagged and handed to
//! the [`ContentFactory`]; the parse stage that follows is never cancelled.
//!
//! Requests are polled once per frame with a no-op waker, so any executor
//! (or none) may drive the underlying I/O.

use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{AbortHandle, BoxFuture, abortable};
use futures::task::noop_waker_ref;
use tracing::debug;

use crate::content::{ContentFactory, ContentFuture, ContentPayload, ContentVariant, LoadedContent};

/// Why a fetch did not produce bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The transport gave up on the request (throttled or cancelled).
    #[error("request aborted")]
    Aborted,

    /// The transport failed.
    #[error("{message}")]
    Failed { message: String },
}

pub type FetchFuture = BoxFuture<'static, Result<Vec<u8>, FetchError>>;

/// Transport used to retrieve tile payloads.
pub trait ByteFetcher: Send + Sync {
    /// Start fetching `url`. Lower `priority` values are more urgent.
    fn fetch(&self, url: &str, priority: f64) -> FetchFuture;
}

/// Result of the fetch stage after abort handling.
enum FetchOutcome {
    Bytes(Vec<u8>),
    Aborted,
    Failed(String),
}

enum Stage {
    Fetching {
        future: BoxFuture<'static, FetchOutcome>,
        abort: AbortHandle,
    },
    Processing(ContentFuture),
    Finished,
}

/// What happened to a request during one poll.
#[derive(Debug)]
pub enum RequestProgress {
    /// Still waiting on the current stage.
    Pending,
    /// Bytes arrived and the parse stage started.
    Fetched(ContentVariant),
    /// Content is ready.
    Ready(LoadedContent),
    /// The fetch was cancelled.
    Aborted,
    /// The fetch or the parse failed.
    Failed(String),
}

/// One in-flight content request.
pub struct ContentRequest {
    url: String,
    stage: Stage,
}

impl ContentRequest {
    /// Start fetching `url` through `fetcher`.
    pub fn start(fetcher: &dyn ByteFetcher, url: &str, priority: f64) -> Self {
        let (future, abort) = abortable(fetcher.fetch(url, priority));
        let future = future
            .map(|result| match result {
                Ok(Ok(bytes)) => FetchOutcome::Bytes(bytes),
                Ok(Err(FetchError::Aborted)) | Err(_) => FetchOutcome::Aborted,
                Ok(Err(FetchError::Failed { message })) => FetchOutcome::Failed(message),
            })
            .boxed();
        debug!(url, priority, "content request started");
        Self {
            url: url.to_owned(),
            stage: Stage::Fetching { future, abort },
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the request is still in the cancellable fetch stage.
    pub fn is_fetching(&self) -> bool {
        matches!(self.stage, Stage::Fetching { .. })
    }

    /// Abort the fetch stage. Has no effect once parsing has started.
    pub fn cancel(&self) {
        if let Stage::Fetching { abort, .. } = &self.stage {
            abort.abort();
        }
    }

    /// Advance the current stage without blocking.
    pub fn poll(&mut self, factory: &dyn ContentFactory) -> RequestProgress {
        let mut cx = Context::from_waker(noop_waker_ref());
        match &mut self.stage {
            Stage::Fetching { future, .. } => match future.poll_unpin(&mut cx) {
                Poll::Pending => RequestProgress::Pending,
                Poll::Ready(FetchOutcome::Aborted) => {
                    self.stage = Stage::Finished;
                    RequestProgress::Aborted
                }
                Poll::Ready(FetchOutcome::Failed(message)) => {
                    self.stage = Stage::Finished;
                    RequestProgress::Failed(message)
                }
                Poll::Ready(FetchOutcome::Bytes(bytes)) => match ContentVariant::from_magic(&bytes) {
                    Ok(variant) => {
                        let payload = ContentPayload {
                            url: self.url.clone(),
                            variant,
                            bytes,
                        };
                        self.stage = Stage::Processing(factory.create(payload));
                        RequestProgress::Fetched(variant)
                    }
                    Err(err) => {
                        self.stage = Stage::Finished;
                        RequestProgress::Failed(err.to_string())
                    }
                },
            },
            Stage::Processing(future) => match future.poll_unpin(&mut cx) {
                Poll::Pending => RequestProgress::Pending,
                Poll::Ready(result) => {
                    self.stage = Stage::Finished;
                    match result {
                        Ok(content) => RequestProgress::Ready(content),
                        Err(err) => RequestProgress::Failed(err.to_string()),
                    }
                }
            },
            Stage::Finished => RequestProgress::Pending,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::content::{ContentCounts, ContentMemory, ContentUpdateContext, TileContent};
    use crate::error::ContentError;
    use crate::frame::FrameState;
    use futures::channel::oneshot;
    use futures::future;
    use std::sync::Mutex;

    /// Content that only reports a fixed footprint.
    pub(crate) struct FixedContent {
        pub(crate) variant: ContentVariant,
        pub(crate) bytes: usize,
    }

    impl TileContent for FixedContent {
        fn variant(&self) -> ContentVariant {
            self.variant
        }
        fn update(&mut self, _context: &ContentUpdateContext, _frame: &FrameState) {}
        fn show(&mut self) {}
        fn hide(&mut self) {}
        fn destroy(&mut self) {}
        fn memory(&self) -> ContentMemory {
            ContentMemory {
                geometry_bytes: self.bytes,
                ..ContentMemory::default()
            }
        }
        fn counts(&self) -> ContentCounts {
            ContentCounts::default()
        }
        fn has_property(&self, _feature_id: u64, _name: &str) -> bool {
            false
        }
        fn get_property(&self, _feature_id: u64, _name: &str) -> Option<String> {
            None
        }
    }

    pub(crate) struct FixedFactory;

    impl ContentFactory for FixedFactory {
        fn create(&self, payload: ContentPayload) -> ContentFuture {
            let content: Box<dyn TileContent> = Box::new(FixedContent {
                variant: payload.variant,
                bytes: payload.bytes.len(),
            });
            future::ready(Ok(LoadedContent::Renderable(content))).boxed()
        }
    }

    struct RejectingFactory;

    impl ContentFactory for RejectingFactory {
        fn create(&self, payload: ContentPayload) -> ContentFuture {
            future::ready(Err(ContentError::Decode {
                variant: payload.variant.to_string(),
                message: "corrupt".into(),
            }))
            .boxed()
        }
    }

    /// Fetcher whose responses are released by the test through channels.
    #[derive(Default)]
    struct ManualFetcher {
        senders: Mutex<Vec<oneshot::Sender<Result<Vec<u8>, FetchError>>>>,
    }

    impl ManualFetcher {
        fn respond(&self, result: Result<Vec<u8>, FetchError>) {
            let sender = self.senders.lock().unwrap().remove(0);
            sender.send(result).unwrap();
        }
    }

    impl ByteFetcher for ManualFetcher {
        fn fetch(&self, _url: &str, _priority: f64) -> FetchFuture {
            let (tx, rx) = oneshot::channel();
            self.senders.lock().unwrap().push(tx);
            rx.map(|result| result.unwrap_or(Err(FetchError::Aborted)))
                .boxed()
        }
    }

    /// Bytes move the request to processing, then to ready.
    #[test]
    fn test_fetch_then_parse() {
        let fetcher = ManualFetcher::default();
        let mut request = ContentRequest::start(&fetcher, "a.b3dm", 0.0);
        assert!(matches!(request.poll(&FixedFactory), RequestProgress::Pending));

        fetcher.respond(Ok(b"b3dm0000".to_vec()));
        assert!(matches!(
            request.poll(&FixedFactory),
            RequestProgress::Fetched(ContentVariant::BatchedModel)
        ));
        assert!(!request.is_fetching());
        match request.poll(&FixedFactory) {
            RequestProgress::Ready(LoadedContent::Renderable(content)) => {
                assert_eq!(content.memory().geometry_bytes, 8);
            }
            other => panic!("expected ready content, got {other:?}"),
        }
    }

    /// Cancelling during the fetch stage reports an abort, not a failure.
    #[test]
    fn test_cancel_during_fetch_aborts() {
        let fetcher = ManualFetcher::default();
        let mut request = ContentRequest::start(&fetcher, "a.b3dm", 0.0);
        request.cancel();
        assert!(matches!(request.poll(&FixedFactory), RequestProgress::Aborted));
    }

    /// A transport-level abort is also an abort.
    #[test]
    fn test_transport_abort() {
        let fetcher = ManualFetcher::default();
        let mut request = ContentRequest::start(&fetcher, "a.b3dm", 0.0);
        fetcher.respond(Err(FetchError::Aborted));
        assert!(matches!(request.poll(&FixedFactory), RequestProgress::Aborted));
    }

    /// Cancel has no effect once the parse stage started.
    #[test]
    fn test_cancel_after_fetch_is_ignored() {
        let fetcher = ManualFetcher::default();
        let mut request = ContentRequest::start(&fetcher, "a.pnts", 0.0);
        fetcher.respond(Ok(b"pnts".to_vec()));
        assert!(matches!(request.poll(&FixedFactory), RequestProgress::Fetched(_)));
        request.cancel();
        assert!(matches!(
            request.poll(&FixedFactory),
            RequestProgress::Ready(_)
        ));
    }

    #[test]
    fn test_fetch_failure() {
        let fetcher = ManualFetcher::default();
        let mut request = ContentRequest::start(&fetcher, "a.b3dm", 0.0);
        fetcher.respond(Err(FetchError::Failed {
            message: "404".into(),
        }));
        match request.poll(&FixedFactory) {
            RequestProgress::Failed(message) => assert_eq!(message, "404"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    /// An unknown magic fails the request before the factory sees it.
    #[test]
    fn test_bad_magic_fails() {
        let fetcher = ManualFetcher::default();
        let mut request = ContentRequest::start(&fetcher, "a.bin", 0.0);
        fetcher.respond(Ok(b"zzzz".to_vec()));
        match request.poll(&FixedFactory) {
            RequestProgress::Failed(message) => assert!(message.contains("magic")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_failure() {
        let fetcher = ManualFetcher::default();
        let mut request = ContentRequest::start(&fetcher, "a.b3dm", 0.0);
        fetcher.respond(Ok(b"b3dm".to_vec()));
        assert!(matches!(request.poll(&RejectingFactory), RequestProgress::Fetched(_)));
        match request.poll(&RejectingFactory) {
            RequestProgress::Failed(message) => assert!(message.contains("corrupt")),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
