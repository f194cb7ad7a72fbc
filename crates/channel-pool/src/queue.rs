//! Bounded FIFO queue used as the pool's storage and wait point.
//!
//! A [`BoundedQueue`] holds at most `capacity` items. Consumers suspend in
//! [`pop`](BoundedQueue::pop) while it is empty and producers suspend in
//! [`push`](BoundedQueue::push) while it is full. Both waits honour a
//! [`Wait`] policy (forever, immediate, or a timeout, optionally tied to a
//! [`CancellationToken`]). A wait that fails neither inserts nor removes
//! anything.
//!
//! Closing the queue wakes every suspended task; subsequent operations fail
//! with [`QueueErrorKind::Closed`].

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::QueueErrorKind;

/// How long a queue operation may suspend.
#[derive(Debug, Clone, Default)]
pub struct Wait {
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl Wait {
    /// Wait until the operation can complete.
    #[must_use]
    pub fn forever() -> Self {
        Self::default()
    }

    /// Fail immediately instead of suspending.
    #[must_use]
    pub fn immediate() -> Self {
        Self::timeout(Duration::ZERO)
    }

    /// Wait at most `timeout`.
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    /// `None` waits forever, `Some(d)` waits at most `d`.
    #[must_use]
    pub fn from_option(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            cancel: None,
        }
    }

    /// Interpret a timeout in fractional seconds.
    ///
    /// Negative (or NaN) values wait forever and `0.0` fails immediately.
    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_nan() || secs < 0.0 {
            Self::forever()
        } else {
            Duration::try_from_secs_f64(secs).map_or_else(|_| Self::forever(), Self::timeout)
        }
    }

    /// Abort the wait with [`QueueErrorKind::Canceled`] once `token` fires.
    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The timeout bound, if any.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn is_immediate(&self) -> bool {
        self.timeout == Some(Duration::ZERO)
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| Instant::now() + timeout)
    }

    pub(crate) fn token(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }
}

/// A failed queue operation.
///
/// Carries the item that could not be enqueued so ownership returns to the
/// caller.
#[derive(Debug)]
pub struct QueueError<T> {
    kind: QueueErrorKind,
    item: T,
}

impl<T> QueueError<T> {
    fn new(kind: QueueErrorKind, item: T) -> Self {
        Self { kind, item }
    }

    /// Why the operation failed.
    #[must_use]
    pub fn kind(&self) -> QueueErrorKind {
        self.kind
    }

    /// Take back the rejected item.
    pub fn into_item(self) -> T {
        self.item
    }
}

impl<T> std::fmt::Display for QueueError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue operation failed: {}", self.kind)
    }
}

impl<T: std::fmt::Debug> std::error::Error for QueueError<T> {}

/// Snapshot of queue activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Tasks suspended in `pop` because the queue is empty.
    pub consumers: usize,
    /// Tasks suspended in `push` because the queue is full.
    pub producers: usize,
    /// Items currently queued.
    pub queued: usize,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    consumers: usize,
    producers: usize,
}

#[derive(Clone, Copy)]
enum Role {
    Consumer,
    Producer,
}

/// Registers a suspended task in the waiter counters for as long as it lives.
struct Waiting<'a, T> {
    state: &'a Mutex<State<T>>,
    role: Role,
}

impl<'a, T> Waiting<'a, T> {
    fn register(state: &'a Mutex<State<T>>, role: Role) -> Self {
        let mut guard = state.lock();
        match role {
            Role::Consumer => guard.consumers += 1,
            Role::Producer => guard.producers += 1,
        }
        Self { state, role }
    }
}

impl<T> Drop for Waiting<'_, T> {
    fn drop(&mut self) {
        let mut guard = self.state.lock();
        match self.role {
            Role::Consumer => guard.consumers -= 1,
            Role::Producer => guard.producers -= 1,
        }
    }
}

/// A bounded multi-producer multi-consumer FIFO queue.
pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue holding at most `capacity` items.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                consumers: 0,
                producers: 0,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity,
        }
    }

    /// Maximum number of queued items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether no items are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Whether the queue holds `capacity` items.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.state.lock().items.len() >= self.capacity
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Current waiter counts and length.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            consumers: state.consumers,
            producers: state.producers,
            queued: state.items.len(),
        }
    }

    /// Enqueue without suspending.
    ///
    /// A full queue reports [`QueueErrorKind::Timeout`], matching a push with
    /// a zero timeout.
    pub fn try_push(&self, item: T) -> Result<(), QueueError<T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(QueueError::new(QueueErrorKind::Closed, item));
        }
        if state.items.len() >= self.capacity {
            return Err(QueueError::new(QueueErrorKind::Timeout, item));
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue without suspending.
    pub fn try_pop(&self) -> Result<T, QueueError<()>> {
        let mut state = self.state.lock();
        match state.items.pop_front() {
            Some(item) => {
                drop(state);
                self.not_full.notify_one();
                Ok(item)
            }
            None if state.closed => Err(QueueError::new(QueueErrorKind::Closed, ())),
            None => Err(QueueError::new(QueueErrorKind::Timeout, ())),
        }
    }

    /// Enqueue `item`, suspending while the queue is full.
    pub async fn push(&self, item: T, wait: &Wait) -> Result<(), QueueError<T>> {
        let deadline = wait.deadline();
        let mut waiting = None;

        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(QueueError::new(QueueErrorKind::Closed, item));
                }
                if state.items.len() < self.capacity {
                    state.items.push_back(item);
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            if wait.is_immediate() {
                return Err(QueueError::new(QueueErrorKind::Timeout, item));
            }
            if waiting.is_none() {
                waiting = Some(Waiting::register(&self.state, Role::Producer));
            }

            if let Err(kind) = park(notified, deadline, wait.cancel.as_ref()).await {
                drop(waiting);
                // a wakeup this task consumed may belong to another producer
                if !self.is_full() {
                    self.not_full.notify_one();
                }
                return Err(QueueError::new(kind, item));
            }
        }
    }

    /// Dequeue the oldest item, suspending while the queue is empty.
    pub async fn pop(&self, wait: &Wait) -> Result<T, QueueError<()>> {
        let deadline = wait.deadline();
        let mut waiting = None;

        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.not_full.notify_one();
                    return Ok(item);
                }
                if state.closed {
                    return Err(QueueError::new(QueueErrorKind::Closed, ()));
                }
            }

            if wait.is_immediate() {
                return Err(QueueError::new(QueueErrorKind::Timeout, ()));
            }
            if waiting.is_none() {
                waiting = Some(Waiting::register(&self.state, Role::Consumer));
            }

            if let Err(kind) = park(notified, deadline, wait.cancel.as_ref()).await {
                drop(waiting);
                if !self.is_empty() {
                    self.not_empty.notify_one();
                }
                return Err(QueueError::new(kind, ()));
            }
        }
    }

    /// Close the queue.
    ///
    /// Returns the items that were still queued on the first call, `None` if
    /// the queue was already closed. Every suspended task is woken and fails
    /// with [`QueueErrorKind::Closed`].
    pub fn close(&self) -> Option<Vec<T>> {
        let drained = {
            let mut state = self.state.lock();
            if state.closed {
                return None;
            }
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        Some(drained)
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("queued", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Suspend until `notified` fires, the deadline passes, or `cancel` fires.
pub(crate) async fn park<F>(
    notified: Pin<&mut F>,
    deadline: Option<Instant>,
    cancel: Option<&CancellationToken>,
) -> Result<(), QueueErrorKind>
where
    F: Future<Output = ()>,
{
    let expired = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    let canceled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        () = notified => Ok(()),
        () = canceled => Err(QueueErrorKind::Canceled),
        () = expired => Err(QueueErrorKind::Timeout),
    }
}
