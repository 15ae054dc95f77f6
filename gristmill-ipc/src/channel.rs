//! Duplex message channel with correlated and streamed replies
//!
//! The channel pairs a request sender with a reply router. Every request is
//! stamped with a process-wide monotonic id; replies carry the id they
//! answer. Three send modes are layered on top: fire-and-forget, single
//! awaited reply, and a streamed sequence of replies that ends on a
//! terminal reply.
//!
//! A streamed request owns an unbounded per-request queue, so a reply that
//! arrives while the consumer is suspended is buffered, never dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::{IpcError, IpcResult};
use crate::protocol::{next_message_id, MessageId, Reply, ReplyEnvelope, Request, RequestEnvelope};

/// How many completed message ids are remembered for late-reply filtering.
const COMPLETED_HISTORY: usize = 1024;

/// Channel halves handed to the spawned executor.
pub struct ExecutorEndpoint {
    pub requests: mpsc::UnboundedReceiver<RequestEnvelope>,
    pub replies: mpsc::UnboundedSender<ReplyEnvelope>,
}

/// Uncorrelated channel activity observed by the reply router.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The executor announced readiness.
    Online,
    /// The executor side closed its reply sender.
    Closed,
    /// A reply referenced an unknown message id.
    Protocol(IpcError),
}

enum ReplyWaiter {
    Single(oneshot::Sender<IpcResult<Reply>>),
    Stream(mpsc::UnboundedSender<IpcResult<Reply>>),
}

#[derive(Default)]
struct PendingTable {
    waiters: HashMap<MessageId, ReplyWaiter>,
    completed: VecDeque<MessageId>,
    completed_set: HashSet<MessageId>,
}

impl PendingTable {
    fn mark_completed(&mut self, id: MessageId) {
        if self.completed_set.insert(id) {
            self.completed.push_back(id);
            if self.completed.len() > COMPLETED_HISTORY {
                if let Some(evicted) = self.completed.pop_front() {
                    self.completed_set.remove(&evicted);
                }
            }
        }
    }

    fn is_completed(&self, id: MessageId) -> bool {
        self.completed_set.contains(&id)
    }
}

struct ChannelInner {
    requests: Mutex<Option<mpsc::UnboundedSender<RequestEnvelope>>>,
    pending: Mutex<PendingTable>,
}

/// Controller-side endpoint of the channel to one executor.
///
/// Cheap to clone; all clones share the request sender and the pending
/// request table.
#[derive(Clone)]
pub struct MessageChannel {
    inner: Arc<ChannelInner>,
}

impl MessageChannel {
    /// Build a channel pair and spawn the reply router on the current
    /// runtime. Uncorrelated activity is forwarded to `events`.
    pub fn new(events: mpsc::UnboundedSender<ChannelEvent>) -> (Self, ExecutorEndpoint) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ReplyEnvelope>();

        let inner = Arc::new(ChannelInner {
            requests: Mutex::new(Some(request_tx)),
            pending: Mutex::new(PendingTable::default()),
        });

        let router = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(envelope) = reply_rx.recv().await {
                router.route_reply(envelope, &events);
            }
            let _ = events.send(ChannelEvent::Closed);
        });

        (
            Self { inner },
            ExecutorEndpoint {
                requests: request_rx,
                replies: reply_tx,
            },
        )
    }

    /// Fire-and-forget send. Returns the allocated message id.
    pub fn send(&self, request: Request) -> IpcResult<MessageId> {
        let id = next_message_id();
        self.post(RequestEnvelope { id, request })?;
        Ok(id)
    }

    /// Send and await the single correlated reply.
    pub async fn send_await(&self, request: Request) -> IpcResult<Reply> {
        let id = next_message_id();
        let (tx, rx) = oneshot::channel();

        // Register before sending so the reply cannot race the waiter.
        self.register(id, ReplyWaiter::Single(tx));
        if let Err(error) = self.post(RequestEnvelope { id, request }) {
            self.discard(id);
            return Err(error);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(IpcError::ChannelClosed),
        }
    }

    /// Send and stream the correlated replies until a terminal reply.
    pub fn send_stream(&self, request: Request) -> IpcResult<ReplyStream> {
        let id = next_message_id();
        let (tx, rx) = mpsc::unbounded_channel();

        self.register(id, ReplyWaiter::Stream(tx));
        if let Err(error) = self.post(RequestEnvelope { id, request }) {
            self.discard(id);
            return Err(error);
        }

        Ok(ReplyStream {
            inner: UnboundedReceiverStream::new(rx),
        })
    }

    /// Reject every pending request with `error`.
    ///
    /// The table is drained atomically; late replies for the drained ids
    /// are treated as completed and ignored.
    pub fn reject_all_pending(&self, error: IpcError) {
        let mut table = self.inner.pending.lock().expect("pending table poisoned");
        let drained: Vec<(MessageId, ReplyWaiter)> = table.waiters.drain().collect();
        for (id, waiter) in drained {
            table.mark_completed(id);
            match waiter {
                ReplyWaiter::Single(tx) => {
                    let _ = tx.send(Err(error.clone()));
                }
                ReplyWaiter::Stream(tx) => {
                    let _ = tx.send(Err(error.clone()));
                }
            }
        }
    }

    /// Close the request side. The executor's dispatch loop drains what it
    /// already received and exits.
    pub fn close(&self) {
        self.inner
            .requests
            .lock()
            .expect("request sender poisoned")
            .take();
    }

    fn post(&self, envelope: RequestEnvelope) -> IpcResult<()> {
        let guard = self.inner.requests.lock().expect("request sender poisoned");
        match guard.as_ref() {
            Some(tx) => tx.send(envelope).map_err(|_| IpcError::ChannelClosed),
            None => Err(IpcError::ChannelClosed),
        }
    }

    fn register(&self, id: MessageId, waiter: ReplyWaiter) {
        let mut table = self.inner.pending.lock().expect("pending table poisoned");
        debug_assert!(!table.waiters.contains_key(&id));
        table.waiters.insert(id, waiter);
    }

    fn discard(&self, id: MessageId) {
        let mut table = self.inner.pending.lock().expect("pending table poisoned");
        table.waiters.remove(&id);
    }
}

impl ChannelInner {
    fn route_reply(&self, envelope: ReplyEnvelope, events: &mpsc::UnboundedSender<ChannelEvent>) {
        let Some(to) = envelope.to else {
            match envelope.reply {
                Reply::Online => {
                    let _ = events.send(ChannelEvent::Online);
                }
                other => warn!(reply = ?other, "Uncorrelated reply dropped"),
            }
            return;
        };

        let mut table = self.pending.lock().expect("pending table poisoned");
        let terminal = envelope.reply.is_terminal();

        match table.waiters.get(&to) {
            Some(ReplyWaiter::Single(_)) => {
                if let Some(ReplyWaiter::Single(tx)) = table.waiters.remove(&to) {
                    table.mark_completed(to);
                    let _ = tx.send(Ok(envelope.reply));
                }
            }
            Some(ReplyWaiter::Stream(tx)) => {
                let delivered = tx.send(Ok(envelope.reply)).is_ok();
                if terminal || !delivered {
                    // Consumer done (terminal reply) or gone (stream
                    // dropped mid-request); either way the id is finished.
                    table.waiters.remove(&to);
                    table.mark_completed(to);
                }
            }
            None => {
                if table.is_completed(to) {
                    debug!(message_id = to, "Late reply for completed request ignored");
                } else {
                    let _ = events.send(ChannelEvent::Protocol(IpcError::Protocol { id: to }));
                }
            }
        }
    }
}

/// Streamed replies for one request, in posting order.
pub struct ReplyStream {
    inner: UnboundedReceiverStream<IpcResult<Reply>>,
}

impl ReplyStream {
    /// Next reply, or `None` once the request has completed.
    pub async fn recv(&mut self) -> Option<IpcResult<Reply>> {
        self.inner.next().await
    }
}

impl Stream for ReplyStream {
    type Item = IpcResult<Reply>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
