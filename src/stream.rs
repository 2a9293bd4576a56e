//! Query Result Streams: live, cancellable sequences of record-set snapshots.
//!
//! ```text
//!  LocalStore commit ──▶ QueryObserver ──▶ mpsc ──▶ QueryStream::next()
//!                            ▲                          │
//!                            └──── unregister ◀── cancel() / drop
//! ```
//!
//! Cancelling is synchronous: once [`QueryStream::cancel`] returns, the
//! observer is gone from the store and no further snapshot is delivered, even
//! if a remote call started by the stream completes afterwards.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::DataAccessError;

/// One stream value: the full current matching set, or the error that ended the stream.
pub type StreamItem<R> = Result<Vec<R>, DataAccessError>;

/// Progress of the remote branch feeding a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// No remote branch.
    LocalOnly,
    /// Remote call in flight.
    RemotePending,
    /// Remote result merged (or emitted, for remote-only streams).
    RemoteApplied,
    /// Remote call or merge failed.
    RemoteFailed,
    /// Stream cancelled. Terminal.
    Cancelled,
}

impl SyncState {
    /// Whether no further remote-driven change is expected.
    pub fn is_settled(&self) -> bool {
        !matches!(self, SyncState::RemotePending)
    }
}

type Hook = Box<dyn FnOnce() + Send>;

struct CancellationInner {
    token: CancellationToken,
    hooks: Mutex<Vec<Hook>>,
}

/// Cancellation handle shared between a stream, its observer and its remote branch.
///
/// Hooks registered with [`on_cancel`](Self::on_cancel) run synchronously inside
/// [`cancel`](Self::cancel), exactly once.
#[derive(Clone)]
pub struct Cancellation {
    inner: Arc<CancellationInner>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellation")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationInner {
                token: CancellationToken::new(),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.token.cancel();
        let hooks = match self.inner.hooks.lock() {
            Ok(mut hooks) => std::mem::take(&mut *hooks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for hook in hooks {
            hook();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once cancelled.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// The underlying token, for racing async work against cancellation.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Run `hook` on cancellation, or right away if already cancelled.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = match self.inner.hooks.lock() {
            Ok(hooks) => hooks,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.inner.token.is_cancelled() {
            drop(hooks);
            hook();
        } else {
            hooks.push(Box::new(hook));
        }
    }
}

/// Writer side of a stream's [`SyncState`]. Never overwrites `Cancelled`.
#[derive(Clone)]
pub(crate) struct SyncHandle {
    sender: Arc<watch::Sender<SyncState>>,
}

impl SyncHandle {
    pub(crate) fn set(&self, state: SyncState) {
        self.sender.send_if_modified(|current| {
            if *current == SyncState::Cancelled || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

/// A live sequence of snapshots for one query.
///
/// The stream ends after an error item, when its source completes (remote-only
/// fetches), or when cancelled. Dropping the stream cancels it.
pub struct QueryStream<R> {
    receiver: mpsc::UnboundedReceiver<StreamItem<R>>,
    cancellation: Cancellation,
    sync: watch::Receiver<SyncState>,
    sync_handle: SyncHandle,
    finished: bool,
}

impl<R> fmt::Debug for QueryStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStream")
            .field("sync", &*self.sync.borrow())
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("finished", &self.finished)
            .finish()
    }
}

impl<R> QueryStream<R> {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<StreamItem<R>>,
        cancellation: Cancellation,
        initial: SyncState,
    ) -> Self {
        let (sender, sync) = watch::channel(initial);
        let sync_handle = SyncHandle {
            sender: Arc::new(sender),
        };
        let on_cancel = Arc::clone(&sync_handle.sender);
        cancellation.on_cancel(move || {
            on_cancel.send_replace(SyncState::Cancelled);
        });
        Self {
            receiver,
            cancellation,
            sync,
            sync_handle,
            finished: false,
        }
    }

    /// A stream whose only item is `error`.
    pub(crate) fn failed(error: DataAccessError) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(Err(error));
        Self::new(receiver, Cancellation::new(), SyncState::LocalOnly)
    }

    pub(crate) fn sync_handle(&self) -> SyncHandle {
        self.sync_handle.clone()
    }

    /// Wait for the next snapshot. `None` once the stream has ended or been cancelled.
    pub async fn next(&mut self) -> Option<StreamItem<R>> {
        std::future::poll_fn(|cx| self.poll_item(cx)).await
    }

    /// Take an already-delivered item without waiting.
    pub fn try_next(&mut self) -> Option<StreamItem<R>> {
        if self.finished || self.cancellation.is_cancelled() {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(item) => self.track(Some(item)),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => self.track(None),
        }
    }

    /// Stop the stream. No item is delivered after this returns.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// A handle that can cancel this stream from elsewhere.
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }

    pub fn sync_state(&self) -> SyncState {
        *self.sync.borrow()
    }

    /// Watch the remote branch's progress.
    pub fn sync_updates(&self) -> watch::Receiver<SyncState> {
        self.sync.clone()
    }

    /// Wait until the remote branch (if any) has applied or failed.
    pub async fn settled(&mut self) -> SyncState {
        let settled = self
            .sync
            .wait_for(SyncState::is_settled)
            .await
            .map(|state| *state);
        settled.unwrap_or_else(|_| *self.sync.borrow())
    }

    /// Forward items to callbacks on a spawned task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<N, E>(self, mut on_next: N, mut on_error: E) -> Subscription
    where
        R: Send + 'static,
        N: FnMut(Vec<R>) + Send + 'static,
        E: FnMut(DataAccessError) + Send + 'static,
    {
        let cancellation = self.cancellation.clone();
        let mut stream = self;
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                if stream.is_cancelled() {
                    break;
                }
                match item {
                    Ok(records) => on_next(records),
                    Err(error) => on_error(error),
                }
            }
        });
        Subscription { cancellation }
    }

    fn poll_item(&mut self, cx: &mut Context<'_>) -> Poll<Option<StreamItem<R>>> {
        if self.finished || self.cancellation.is_cancelled() {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(item) => Poll::Ready(self.track(item)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn track(&mut self, item: Option<StreamItem<R>>) -> Option<StreamItem<R>> {
        match &item {
            None | Some(Err(_)) => self.finished = true,
            Some(Ok(_)) => {}
        }
        if self.cancellation.is_cancelled() {
            return None;
        }
        item
    }
}

impl<R> Stream for QueryStream<R> {
    type Item = StreamItem<R>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_item(cx)
    }
}

impl<R> Drop for QueryStream<R> {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

/// Handle returned by [`QueryStream::subscribe`]. Dropping it cancels the stream.
#[derive(Debug)]
pub struct Subscription {
    cancellation: Cancellation,
}

impl Subscription {
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}
