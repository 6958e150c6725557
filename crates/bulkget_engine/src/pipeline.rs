//! HTTP/1.1 request pipelining over one owned transport.
//!
//! A writer task serializes queued requests onto the transport in order and a
//! reader task parses responses in that same order, handing each to the
//! completion handler of the request it answers. At most `depth` requests are
//! outstanding at once: `queue_request` waits for a window slot, and the slot
//! is released only after the matching response has been handed over.
//!
//! Every handler runs exactly once: with its response, or with
//! [`FetchError::ConnectionShutdown`] when the connection fails or closes
//! before the response could be read.

use std::sync::Arc;

use bulkget_logging::{bulk_debug, bulk_warn};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineSettings;
use crate::group::TaskGroup;
use crate::http1::{self, RawResponse, StoreRequest};
use crate::transport::BoxTransport;
use crate::FetchError;

pub type ResponseOutcome = Result<RawResponse, FetchError>;

/// Receives the outcome of one pipelined request.
///
/// Consumed on invocation, so it cannot run twice. Handlers run on the
/// connection's reader (or writer, during shutdown) and must not block.
pub trait CompletionHandler: Send + 'static {
    fn complete(self: Box<Self>, outcome: ResponseOutcome);
}

impl<F> CompletionHandler for F
where
    F: FnOnce(ResponseOutcome) + Send + 'static,
{
    fn complete(self: Box<Self>, outcome: ResponseOutcome) {
        (*self)(outcome)
    }
}

struct QueuedRequest {
    request: StoreRequest,
    handler: Option<Box<dyn CompletionHandler>>,
}

impl QueuedRequest {
    fn new(request: StoreRequest, handler: Box<dyn CompletionHandler>) -> Self {
        Self {
            request,
            handler: Some(handler),
        }
    }

    fn complete(mut self, outcome: ResponseOutcome) {
        if let Some(handler) = self.handler.take() {
            handler.complete(outcome);
        }
    }

    fn shut_down(self) {
        self.complete(Err(FetchError::ConnectionShutdown));
    }
}

// A request dropped on any path that did not complete it (a panicking task
// unwinding its channels included) still reaches its handler.
impl Drop for QueuedRequest {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.complete(Err(FetchError::ConnectionShutdown));
        }
    }
}

/// A queued request holding its in-flight window slot.
struct Pending {
    queued: QueuedRequest,
    _slot: OwnedSemaphorePermit,
}

type WriteSide = WriteHalf<BoxTransport>;

pub struct PipelinedConnection {
    intake: Option<mpsc::UnboundedSender<Pending>>,
    window: Arc<Semaphore>,
    group: TaskGroup,
    deferred: Vec<QueuedRequest>,
    write_side: oneshot::Receiver<WriteSide>,
}

impl PipelinedConnection {
    /// Take ownership of `transport` and start the writer and reader tasks.
    ///
    /// The connection's cancellation is a child of `parent`.
    pub fn new(
        transport: BoxTransport,
        settings: PipelineSettings,
        parent: &CancellationToken,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (inflight_tx, inflight_rx) = mpsc::unbounded_channel();
        let (write_side_tx, write_side_rx) = oneshot::channel();

        let mut group = TaskGroup::new(parent);
        let cancel = group.token().clone();
        group.spawn(write_loop(
            write_half,
            intake_rx,
            inflight_tx,
            write_side_tx,
            cancel.clone(),
        ));
        group.spawn(read_loop(
            BufReader::new(read_half),
            inflight_rx,
            settings.max_body_bytes,
            cancel,
        ));

        Self {
            intake: Some(intake_tx),
            window: Arc::new(Semaphore::new(settings.depth)),
            group,
            deferred: Vec::new(),
            write_side: write_side_rx,
        }
    }

    /// Queue `request`, waiting for a free slot in the in-flight window.
    ///
    /// Returns [`FetchError::ConnectionShutdown`] when the connection is
    /// cancelled before the request is accepted. The handler is then kept and
    /// invoked with that error from [`PipelinedConnection::close`]; the caller
    /// should stop queueing.
    pub async fn queue_request<H>(&mut self, request: StoreRequest, handler: H) -> Result<(), FetchError>
    where
        H: CompletionHandler,
    {
        let queued = QueuedRequest::new(request, Box::new(handler));

        let cancel = self.group.token().clone();
        let slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&self.window).acquire_owned() => permit.ok(),
        };
        let Some(slot) = slot else {
            self.deferred.push(queued);
            return Err(FetchError::ConnectionShutdown);
        };

        let Some(intake) = self.intake.as_ref() else {
            self.deferred.push(queued);
            return Err(FetchError::ConnectionShutdown);
        };
        if let Err(mpsc::error::SendError(pending)) = intake.send(Pending { queued, _slot: slot }) {
            self.deferred.push(pending.queued);
            return Err(FetchError::ConnectionShutdown);
        }
        Ok(())
    }

    /// Stop accepting requests, let the tasks finish what is in flight, close
    /// the transport, and return the first error either task hit.
    pub async fn close(mut self) -> Result<(), FetchError> {
        self.intake.take();
        let result = self.group.wait().await;

        if !self.deferred.is_empty() {
            bulk_debug!(
                "pipelined connection: failing {} requests that were never written",
                self.deferred.len()
            );
        }
        for queued in self.deferred.drain(..) {
            queued.shut_down();
        }

        if let Ok(mut write_side) = self.write_side.await {
            let _ = write_side.shutdown().await;
        }
        result
    }
}

async fn write_loop(
    mut writer: WriteSide,
    mut intake: mpsc::UnboundedReceiver<Pending>,
    inflight: mpsc::UnboundedSender<Pending>,
    write_side: oneshot::Sender<WriteSide>,
    cancel: CancellationToken,
) -> Result<(), FetchError> {
    let outcome = loop {
        let pending = tokio::select! {
            _ = cancel.cancelled() => break Err(FetchError::Cancelled),
            next = intake.recv() => match next {
                Some(pending) => pending,
                None => break Ok(()),
            },
        };

        let written = match http1::encode_request(&pending.queued.request) {
            Ok(encoded) => tokio::select! {
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                res = write_flushed(&mut writer, &encoded) => res,
            },
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            pending.queued.shut_down();
            break Err(err);
        }

        // The reader only drops its side after failing and reports that
        // failure itself; whatever we could not hand over is ours to fail.
        if let Err(mpsc::error::SendError(pending)) = inflight.send(pending) {
            pending.queued.shut_down();
            break Ok(());
        }
    };

    match &outcome {
        Err(err) if err.is_connection_fatal() => {
            bulk_warn!("pipelined connection: writer stopped: {}", err)
        }
        Err(err) => bulk_debug!("pipelined connection: writer stopped: {}", err),
        Ok(()) => {}
    }

    intake.close();
    while let Ok(pending) = intake.try_recv() {
        pending.queued.shut_down();
    }
    let _ = write_side.send(writer);
    outcome
}

async fn write_flushed<W>(writer: &mut W, bytes: &[u8]) -> Result<(), FetchError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(bytes)
        .await
        .map_err(|err| FetchError::transport("writing request", err))?;
    writer
        .flush()
        .await
        .map_err(|err| FetchError::transport("flushing request", err))
}

async fn read_loop(
    mut reader: BufReader<ReadHalf<BoxTransport>>,
    mut inflight: mpsc::UnboundedReceiver<Pending>,
    max_body_bytes: u64,
    cancel: CancellationToken,
) -> Result<(), FetchError> {
    let failure = loop {
        let pending = tokio::select! {
            _ = cancel.cancelled() => break FetchError::Cancelled,
            next = inflight.recv() => match next {
                Some(pending) => pending,
                None => return Ok(()),
            },
        };

        let method = pending.queued.request.method.clone();
        let read = tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            res = http1::read_response(&mut reader, &method, max_body_bytes) => res,
        };

        match read {
            Ok(response) => {
                let Pending { queued, _slot } = pending;
                queued.complete(Ok(response));
                // `_slot` drops here, after the handler has the response.
            }
            Err(err) => {
                pending.queued.shut_down();
                break err;
            }
        }
    };

    if failure.is_connection_fatal() {
        bulk_warn!("pipelined connection: reader stopped: {}", failure);
    } else {
        bulk_debug!("pipelined connection: reader stopped: {}", failure);
    }

    // Shutdown-drain: nothing still in the window gets a response now.
    inflight.close();
    while let Some(pending) = inflight.recv().await {
        pending.queued.shut_down();
    }
    Err(failure)
}
