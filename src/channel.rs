//! The channel: a closable, cancellable FIFO conduit between producers and a consumer.
//!
//! A [`Channel`] is a cheap, cloneable handle to shared state. Suspension
//! happens in exactly two places: [`Channel::send`] waits while the buffer is
//! full (or, for a rendezvous channel, until a receiver took the element and
//! asked for the next one) and
//! [`Channel::receive`] waits while the buffer is empty and the channel is open.
//!
//! Closing stores an optional cause. A normal close lets receivers drain what
//! is buffered before they observe end-of-stream; a cause is replayed to every
//! receive after the buffer runs dry. [`Channel::cancel`] additionally throws
//! the buffer away and fires the channel's cancellation token, which is what
//! tears down the producer task bound to it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::tracing_support::{self, trace};

/// Buffering policy of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Capacity {
    /// No buffer: `send` completes once the element was taken and more is wanted
    #[default]
    Rendezvous,
    /// At most `n` elements are buffered (a bound of zero behaves like one)
    Bounded(usize),
    /// `send` never suspends
    Unbounded,
}

impl Capacity {
    /// Buffer size used by [`Capacity::buffered`].
    pub const BUFFERED: usize = 64;

    /// A bounded buffer of [`Capacity::BUFFERED`] elements.
    pub fn buffered() -> Self {
        Capacity::Bounded(Self::BUFFERED)
    }

    fn limit(self) -> usize {
        match self {
            Capacity::Rendezvous => 1,
            Capacity::Bounded(n) => n.max(1),
            Capacity::Unbounded => usize::MAX,
        }
    }
}

/// Error returned by [`Channel::try_send`], handing the element back.
pub enum TrySendError<T> {
    /// The buffer is full
    Full(T),
    /// The channel is closed; carries the error a suspending send would report
    Closed(T, Error),
}

impl<T> TrySendError<T> {
    /// Recover the element that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(item) | TrySendError::Closed(item, _) => item,
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "Full(..)"),
            TrySendError::Closed(_, cause) => write!(f, "Closed(.., {:?})", cause),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "channel is full"),
            TrySendError::Closed(_, cause) => write!(f, "{}", cause),
        }
    }
}

impl<T> std::error::Error for TrySendError<T> {}

struct State<T> {
    queue: VecDeque<T>,
    closed: bool,
    cause: Option<Error>,
    // Sequence numbers pairing a rendezvous sender with the receive that took its element.
    sent: u64,
    taken: u64,
    // Receive calls started so far, and that count when the last element was taken.
    requests: u64,
    taken_at_request: u64,
    // Receive calls currently suspended without an element.
    waiting: usize,
}

impl<T> State<T> {
    fn send_error(&self) -> Error {
        self.cause.clone().unwrap_or(Error::ChannelClosed)
    }

    fn is_cancelled(&self) -> bool {
        matches!(self.cause, Some(Error::Cancelled))
    }

    /// A rendezvous sender holding `ticket` may resume: its element was taken
    /// and the consumer has asked for the one after it.
    fn released(&self, ticket: u64) -> bool {
        self.taken > ticket
            || (self.taken == ticket
                && (self.waiting > 0 || self.requests > self.taken_at_request))
    }
}

enum Push<T> {
    Sent(u64),
    Full(T),
    Closed(T, Error),
}

enum Pop<T> {
    Item(T),
    Empty,
    Closed(Option<Error>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    capacity: Capacity,
    // Senders waiting for space or for a rendezvous hand-off.
    senders: Notify,
    // Receivers waiting for an element or for close.
    receivers: Notify,
    token: CancellationToken,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // State is only mutated in short critical sections without user code,
        // so a poisoned lock still holds consistent data.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, item: T) -> Push<T> {
        let ticket = {
            let mut state = self.lock();
            if state.closed {
                let cause = state.send_error();
                return Push::Closed(item, cause);
            }
            if state.queue.len() >= self.capacity.limit() {
                return Push::Full(item);
            }
            state.queue.push_back(item);
            state.sent += 1;
            state.sent
        };
        tracing_support::count(tracing_support::ELEMENTS_SENT);
        self.receivers.notify_one();
        Push::Sent(ticket)
    }

    /// Record that a receive call started. Wakes rendezvous senders parked
    /// until the consumer asks for more.
    fn request(&self, waiting: bool) {
        {
            let mut state = self.lock();
            state.requests += 1;
            if waiting {
                state.waiting += 1;
            }
        }
        if self.capacity == Capacity::Rendezvous {
            self.senders.notify_waiters();
        }
    }

    /// Pop the next element. `ends_wait` retires one waiting receive in the
    /// same critical section whenever the result is final.
    fn pop(&self, ends_wait: bool) -> Pop<T> {
        let item = {
            let mut state = self.lock();
            let popped = state.queue.pop_front();
            if ends_wait && (popped.is_some() || state.closed) {
                state.waiting -= 1;
            }
            match popped {
                Some(item) => {
                    state.taken += 1;
                    state.taken_at_request = state.requests;
                    item
                }
                None if state.closed => return Pop::Closed(state.cause.clone()),
                None => return Pop::Empty,
            }
        };
        tracing_support::count(tracing_support::ELEMENTS_RECEIVED);
        self.senders.notify_waiters();
        Pop::Item(item)
    }

    fn wake_all(&self) {
        self.senders.notify_waiters();
        self.receivers.notify_waiters();
    }
}

/// A receive call in progress, counted as demand until it gets a final result
/// or is dropped.
struct Waiting<'a, T> {
    shared: &'a Shared<T>,
    active: bool,
}

impl<'a, T> Waiting<'a, T> {
    fn new(shared: &'a Shared<T>) -> Self {
        shared.request(true);
        Self {
            shared,
            active: true,
        }
    }

    fn pop(&mut self) -> Pop<T> {
        let pop = self.shared.pop(self.active);
        if !matches!(pop, Pop::Empty) {
            self.active = false;
        }
        pop
    }
}

impl<T> Drop for Waiting<'_, T> {
    fn drop(&mut self) {
        if self.active {
            self.shared.lock().waiting -= 1;
        }
    }
}

/// A typed, closable FIFO channel.
///
/// Cloning yields another handle to the same channel, which is how several
/// producers fan in to one consumer. Elements are delivered in send order and
/// each element reaches exactly one receive call.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Channel")
            .field("capacity", &self.shared.capacity)
            .field("len", &state.queue.len())
            .field("closed", &state.closed)
            .field("cause", &state.cause)
            .finish()
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new(Capacity::default())
    }
}

impl<T> Channel<T> {
    /// Create a new channel with the given capacity
    pub fn new(capacity: Capacity) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    closed: false,
                    cause: None,
                    sent: 0,
                    taken: 0,
                    requests: 0,
                    taken_at_request: 0,
                    waiting: 0,
                }),
                capacity,
                senders: Notify::new(),
                receivers: Notify::new(),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Create a rendezvous channel
    pub fn rendezvous() -> Self {
        Self::new(Capacity::Rendezvous)
    }

    /// Create a channel buffering at most `n` elements
    pub fn bounded(n: usize) -> Self {
        Self::new(Capacity::Bounded(n))
    }

    /// Create a channel whose sends never suspend
    pub fn unbounded() -> Self {
        Self::new(Capacity::Unbounded)
    }

    /// Send an element, suspending while the buffer is full.
    ///
    /// On a rendezvous channel this resolves only once a receiver has taken the
    /// element and the consumer asked for the next one, so generation never
    /// runs ahead of demand. Fails with [`Error::ChannelClosed`] after a normal
    /// close, or with the stored cause when the channel was closed with one. An
    /// element that was already accepted stays receivable after a close, so
    /// such a send reports success. A sender resumed after the channel was
    /// cancelled reports [`Error::Cancelled`] even if its element was already
    /// delivered.
    pub async fn send(&self, item: T) -> Result<()> {
        let mut item = item;
        let ticket = loop {
            let notified = self.shared.senders.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.shared.push(item) {
                Push::Sent(ticket) => break ticket,
                Push::Closed(_, cause) => return Err(cause),
                Push::Full(back) => item = back,
            }
            notified.await;
        };

        if self.shared.capacity != Capacity::Rendezvous {
            return Ok(());
        }

        loop {
            let notified = self.shared.senders.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.shared.lock();
                if state.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                if state.released(ticket) {
                    return Ok(());
                }
                if state.closed {
                    // Taken, or still queued and receivable: either way delivered.
                    if state.taken >= ticket || !state.queue.is_empty() {
                        return Ok(());
                    }
                    return Err(state.send_error());
                }
            }
            notified.await;
        }
    }

    /// Send without suspending.
    ///
    /// On a rendezvous channel the element is parked in the single hand-off
    /// slot if it is free.
    pub fn try_send(&self, item: T) -> std::result::Result<(), TrySendError<T>> {
        match self.shared.push(item) {
            Push::Sent(_) => Ok(()),
            Push::Full(item) => Err(TrySendError::Full(item)),
            Push::Closed(item, cause) => Err(TrySendError::Closed(item, cause)),
        }
    }

    /// Receive the next element.
    ///
    /// Returns `Ok(None)` at end-of-stream, i.e. once the channel was closed
    /// without a cause and its buffer is drained. A stored cause is returned as
    /// `Err` instead. Dropping the returned future never loses an element.
    pub async fn receive(&self) -> Result<Option<T>> {
        let mut waiting = Waiting::new(&self.shared);
        loop {
            let notified = self.shared.receivers.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match waiting.pop() {
                Pop::Item(item) => return Ok(Some(item)),
                Pop::Closed(None) => return Ok(None),
                Pop::Closed(Some(cause)) => return Err(cause),
                Pop::Empty => {}
            }
            notified.await;
        }
    }

    /// Receive without suspending; [`Error::Empty`] when nothing is buffered yet.
    pub fn try_receive(&self) -> Result<Option<T>> {
        self.shared.request(false);
        match self.shared.pop(false) {
            Pop::Item(item) => Ok(Some(item)),
            Pop::Closed(None) => Ok(None),
            Pop::Closed(Some(cause)) => Err(cause),
            Pop::Empty => Err(Error::Empty),
        }
    }

    /// Close the channel normally. See [`Channel::close_with`].
    pub fn close(&self) -> bool {
        self.close_with(None)
    }

    /// Close the channel, optionally storing a cause for receivers.
    ///
    /// Only the first call has an effect and returns `true`; it wakes every
    /// suspended sender and receiver once. Buffered elements stay receivable.
    pub fn close_with(&self, cause: Option<Error>) -> bool {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.cause = cause;
            trace!(cause = ?state.cause, pending = state.queue.len(), "channel closed");
        }
        self.shared.wake_all();
        true
    }

    /// Cancel the channel: close it with [`Error::Cancelled`], discard buffered
    /// elements and fire the cancellation token of its producers.
    ///
    /// Returns `true` if this call closed the channel. Discarding still happens
    /// on an already closed channel.
    pub fn cancel(&self) -> bool {
        let (closed_now, discarded) = {
            let mut state = self.shared.lock();
            let discarded: Vec<T> = state.queue.drain(..).collect();
            let closed_now = !state.closed;
            if closed_now {
                state.closed = true;
                state.cause = Some(Error::Cancelled);
            }
            (closed_now, discarded)
        };
        trace!(closed_now, discarded = discarded.len(), "channel cancelled");
        // Dropped outside the lock: element destructors are user code.
        drop(discarded);
        self.shared.token.cancel();
        self.shared.wake_all();
        closed_now
    }

    /// True once the channel was closed; sends fail from then on.
    pub fn is_closed_for_send(&self) -> bool {
        self.shared.lock().closed
    }

    /// True once the channel was closed and everything buffered was received.
    pub fn is_closed_for_receive(&self) -> bool {
        let state = self.shared.lock();
        state.closed && state.queue.is_empty()
    }

    /// The cause stored by `close_with` or `cancel`, if any.
    pub fn close_cause(&self) -> Option<Error> {
        self.shared.lock().cause.clone()
    }

    /// Number of buffered elements
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.shared.lock().queue.is_empty()
    }

    /// The buffering policy this channel was created with
    pub fn capacity(&self) -> Capacity {
        self.shared.capacity
    }

    /// The token fired by [`Channel::cancel`].
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.shared.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::yield_now;

    async fn settle() {
        for _ in 0..16 {
            yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_fifo_single_producer() {
        let channel = Channel::bounded(4);
        let tx = channel.clone();
        let producer = tokio::spawn(async move {
            for i in 0..100 {
                tx.send(i).await.unwrap();
            }
            tx.close();
        });

        let mut received = Vec::new();
        while let Some(item) = channel.receive().await.unwrap() {
            received.push(item);
        }
        producer.await.unwrap();

        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_close_drains_buffer_then_ends() {
        let channel = Channel::bounded(8);
        channel.send(1).await.unwrap();
        channel.send(2).await.unwrap();
        assert!(channel.close());

        assert!(channel.is_closed_for_send());
        assert!(!channel.is_closed_for_receive());
        assert_eq!(channel.receive().await.unwrap(), Some(1));
        assert_eq!(channel.receive().await.unwrap(), Some(2));
        assert_eq!(channel.receive().await.unwrap(), None);
        assert!(channel.is_closed_for_receive());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let channel = Channel::unbounded();
        channel.close();
        assert!(matches!(channel.send(1).await, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_close_with_cause_is_replayed() {
        let channel = Channel::bounded(2);
        channel.send("a").await.unwrap();
        channel.close_with(Some(Error::custom("upstream broke")));

        assert_eq!(channel.receive().await.unwrap(), Some("a"));
        for _ in 0..3 {
            let err = channel.receive().await.unwrap_err();
            assert_eq!(err.to_string(), "upstream broke");
        }
        assert!(matches!(channel.send("b").await, Err(Error::Custom(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let channel: Channel<i32> = Channel::bounded(1);
        assert!(channel.close());
        assert!(!channel.close());
        assert!(!channel.close_with(Some(Error::custom("late"))));
        assert!(channel.close_cause().is_none());
        assert_eq!(channel.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancel_discards_buffer() {
        let channel = Channel::bounded(4);
        for i in 0..3 {
            channel.send(i).await.unwrap();
        }
        assert!(channel.cancel());
        assert!(channel.is_empty());
        assert!(channel.token().is_cancelled());
        assert!(matches!(channel.receive().await, Err(Error::Cancelled)));
        assert!(!channel.cancel());
    }

    #[tokio::test]
    async fn test_blocked_sender_woken_by_close() {
        let channel = Channel::bounded(1);
        channel.send(1).await.unwrap();

        let tx = channel.clone();
        let blocked = tokio::spawn(async move { tx.send(2).await });
        settle().await;
        assert!(!blocked.is_finished());

        channel.close();
        assert!(matches!(blocked.await.unwrap(), Err(Error::ChannelClosed)));
        assert_eq!(channel.receive().await.unwrap(), Some(1));
        assert_eq!(channel.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blocked_receiver_woken_by_close() {
        let channel: Channel<u8> = Channel::rendezvous();
        let rx = channel.clone();
        let waiting = tokio::spawn(async move { rx.receive().await });
        settle().await;
        assert!(!waiting.is_finished());

        channel.close();
        assert_eq!(waiting.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_rendezvous_send_waits_for_next_request() {
        let channel = Channel::rendezvous();
        let tx = channel.clone();
        let sender = tokio::spawn(async move { tx.send(7).await });
        settle().await;
        assert!(!sender.is_finished());

        assert_eq!(channel.receive().await.unwrap(), Some(7));
        settle().await;
        assert!(!sender.is_finished());

        assert!(matches!(channel.try_receive(), Err(Error::Empty)));
        assert!(sender.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_rendezvous_sender_released_by_waiting_receiver() {
        let channel: Channel<u8> = Channel::rendezvous();
        let mut receivers = Vec::new();
        for _ in 0..2 {
            let rx = channel.clone();
            receivers.push(tokio::spawn(async move { rx.receive().await }));
        }
        settle().await;

        let tx = channel.clone();
        let sender = tokio::spawn(async move {
            tx.send(1).await?;
            tx.send(2).await
        });

        let mut got = Vec::new();
        for receiver in receivers {
            got.push(receiver.await.unwrap().unwrap());
        }
        got.sort();
        assert_eq!(got, vec![Some(1), Some(2)]);

        settle().await;
        assert!(!sender.is_finished());
        channel.close();
        assert!(sender.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_rendezvous_close_keeps_pending_element_delivered() {
        let channel = Channel::rendezvous();
        let tx = channel.clone();
        let sender = tokio::spawn(async move { tx.send(1).await });
        settle().await;
        assert!(!sender.is_finished());

        assert!(channel.close());
        // The element was accepted before the close: the send succeeds and the
        // element is still delivered exactly once.
        assert!(sender.await.unwrap().is_ok());
        assert_eq!(channel.receive().await.unwrap(), Some(1));
        assert_eq!(channel.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rendezvous_discarded_element_reports_failure() {
        let channel = Channel::rendezvous();
        let tx = channel.clone();
        let sender = tokio::spawn(async move { tx.send(1).await });
        settle().await;

        channel.close_with(Some(Error::custom("shutting down")));
        channel.cancel();
        let err = sender.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "shutting down");
        assert!(channel.is_empty());
    }

    #[test]
    fn test_repeated_close_wakes_receiver_once() {
        use futures::task::{waker, ArcWake};
        use std::future::Future;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::task::{Context, Poll};

        struct CountingWaker(AtomicUsize);

        impl ArcWake for CountingWaker {
            fn wake_by_ref(arc_self: &Arc<Self>) {
                arc_self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let wakes = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = waker(wakes.clone());
        let mut cx = Context::from_waker(&waker);

        let channel: Channel<u8> = Channel::rendezvous();
        let mut receive = Box::pin(channel.receive());
        assert!(receive.as_mut().poll(&mut cx).is_pending());

        assert!(channel.close());
        assert!(!channel.close());
        assert!(!channel.close_with(Some(Error::custom("again"))));
        assert_eq!(wakes.0.load(Ordering::SeqCst), 1);

        assert!(matches!(receive.as_mut().poll(&mut cx), Poll::Ready(Ok(None))));
        assert_eq!(wakes.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rendezvous_sender_observes_cancel_after_handoff() {
        let channel = Channel::rendezvous();
        let tx = channel.clone();
        let sender = tokio::spawn(async move { tx.send(1).await });
        settle().await;

        assert_eq!(channel.receive().await.unwrap(), Some(1));
        channel.cancel();
        assert!(matches!(sender.await.unwrap(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_fan_in_keeps_per_producer_order() {
        let channel = Channel::bounded(3);
        let mut producers = Vec::new();
        for base in [0, 1000] {
            let tx = channel.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..50 {
                    tx.send(base + i).await.unwrap();
                }
            }));
        }

        let rx = channel.clone();
        let collector = tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(item) = rx.receive().await.unwrap() {
                received.push(item);
            }
            received
        });

        for producer in producers {
            producer.await.unwrap();
        }
        channel.close();
        let received = collector.await.unwrap();

        assert_eq!(received.len(), 100);
        let low: Vec<_> = received.iter().copied().filter(|x| *x < 1000).collect();
        let high: Vec<_> = received.iter().copied().filter(|x| *x >= 1000).collect();
        assert_eq!(low, (0..50).collect::<Vec<_>>());
        assert_eq!(high, (1000..1050).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_try_send_and_try_receive() {
        let channel = Channel::bounded(1);
        assert!(channel.try_send(1).is_ok());
        match channel.try_send(2) {
            Err(TrySendError::Full(item)) => assert_eq!(item, 2),
            other => panic!("expected full, got {:?}", other),
        }
        assert_eq!(channel.try_receive().unwrap(), Some(1));
        assert!(matches!(channel.try_receive(), Err(Error::Empty)));

        channel.close();
        assert_eq!(channel.try_receive().unwrap(), None);
        assert_eq!(channel.try_send(3).unwrap_err().into_inner(), 3);
    }

    #[test]
    fn test_capacity_defaults() {
        assert_eq!(Capacity::default(), Capacity::Rendezvous);
        assert_eq!(Capacity::buffered(), Capacity::Bounded(64));
        assert_eq!(Capacity::Bounded(0).limit(), 1);
    }
}
