//! Bounded producer/consumer ringbuffers with stop semantics.
//!
//! Completed heaps are handed from the receive strand to consumers
//! through a bounded FIFO. Two variants share one state machine:
//!
//! - [`Ringbuffer`]: blocking push/pop on OS threads
//!   (mutex + condvars).
//! - [`AsyncRingbuffer`]: `async` push/pop for cooperative schedulers
//!   (mutex + [`tokio::sync::Notify`]), replacing the classic
//!   file-descriptor wake primitive with a task wakeup.
//!
//! `stop()` transitions the buffer to its terminal state and wakes all
//! waiters. A stopped buffer refuses pushes immediately; pops drain the
//! remaining items and then fail.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

struct State<T> {
    queue: VecDeque<T>,
    capacity: usize,
    stopped: bool,
}

impl<T> State<T> {
    fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ringbuffer capacity must be positive");
        State {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            stopped: false,
        }
    }
}

/// Push failed because the buffer was stopped. Carries the rejected
/// value back to the caller.
pub struct PushError<T>(pub T);

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PushError(..)")
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ringbuffer stopped")
    }
}

impl<T> std::error::Error for PushError<T> {}

/// Pop failed because the buffer was stopped and fully drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopError;

impl fmt::Display for PopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ringbuffer stopped and drained")
    }
}

impl std::error::Error for PopError {}

/// Non-blocking push failure.
pub enum TryPushError<T> {
    /// The buffer is full; the value is returned.
    Full(T),
    /// The buffer was stopped; the value is returned.
    Stopped(T),
}

impl<T> fmt::Debug for TryPushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryPushError::Full(_) => f.write_str("TryPushError::Full(..)"),
            TryPushError::Stopped(_) => f.write_str("TryPushError::Stopped(..)"),
        }
    }
}

impl<T> fmt::Display for TryPushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryPushError::Full(_) => f.write_str("ringbuffer full"),
            TryPushError::Stopped(_) => f.write_str("ringbuffer stopped"),
        }
    }
}

impl<T> std::error::Error for TryPushError<T> {}

/// Non-blocking pop failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPopError {
    /// No item available right now.
    Empty,
    /// The buffer was stopped and fully drained.
    Stopped,
}

impl fmt::Display for TryPopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryPopError::Empty => f.write_str("ringbuffer empty"),
            TryPopError::Stopped => f.write_str("ringbuffer stopped and drained"),
        }
    }
}

impl std::error::Error for TryPopError {}

/// Bounded blocking FIFO. One buffer may serve any number of producer
/// and consumer threads.
pub struct Ringbuffer<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> Ringbuffer<T> {
    /// Create a buffer holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Ringbuffer {
            state: Mutex::new(State::new(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Append an item, blocking while the buffer is full.
    ///
    /// Fails once the buffer has been stopped, returning the value.
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return Err(PushError(value));
            }
            if state.queue.len() < state.capacity {
                state.queue.push_back(value);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait(&mut state);
        }
    }

    /// Append an item without blocking.
    pub fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(TryPushError::Stopped(value));
        }
        if state.queue.len() == state.capacity {
            return Err(TryPushError::Full(value));
        }
        state.queue.push_back(value);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking while the buffer is empty.
    ///
    /// After a stop, remaining items are still delivered; once drained,
    /// fails with [`PopError`].
    pub fn pop(&self) -> Result<T, PopError> {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.queue.pop_front() {
                self.not_full.notify_one();
                return Ok(value);
            }
            if state.stopped {
                return Err(PopError);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Remove the oldest item without blocking.
    pub fn try_pop(&self) -> Result<T, TryPopError> {
        let mut state = self.state.lock();
        if let Some(value) = state.queue.pop_front() {
            self.not_full.notify_one();
            return Ok(value);
        }
        if state.stopped {
            Err(TryPopError::Stopped)
        } else {
            Err(TryPopError::Empty)
        }
    }

    /// Stop the buffer and wake every waiter. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// True once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// True if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }
}

/// Bounded FIFO for cooperative schedulers: identical semantics to
/// [`Ringbuffer`], with `async` push/pop that suspend the task instead
/// of blocking the thread.
pub struct AsyncRingbuffer<T> {
    state: Mutex<State<T>>,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> AsyncRingbuffer<T> {
    /// Create a buffer holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        AsyncRingbuffer {
            state: Mutex::new(State::new(capacity)),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Append an item, suspending while the buffer is full.
    pub async fn push(&self, value: T) -> Result<(), PushError<T>> {
        loop {
            // Register interest before inspecting state, so a wakeup
            // issued between the check and the await is not lost.
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.stopped {
                    return Err(PushError(value));
                }
                if state.queue.len() < state.capacity {
                    state.queue.push_back(value);
                    drop(state);
                    self.not_empty.notify_waiters();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Remove the oldest item, suspending while the buffer is empty.
    pub async fn pop(&self) -> Result<T, PopError> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(value) = state.queue.pop_front() {
                    drop(state);
                    self.not_full.notify_waiters();
                    return Ok(value);
                }
                if state.stopped {
                    return Err(PopError);
                }
            }
            notified.await;
        }
    }

    /// Append an item without suspending.
    pub fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(TryPushError::Stopped(value));
        }
        if state.queue.len() == state.capacity {
            return Err(TryPushError::Full(value));
        }
        state.queue.push_back(value);
        drop(state);
        self.not_empty.notify_waiters();
        Ok(())
    }

    /// Remove the oldest item without suspending.
    pub fn try_pop(&self) -> Result<T, TryPopError> {
        let mut state = self.state.lock();
        if let Some(value) = state.queue.pop_front() {
            drop(state);
            self.not_full.notify_waiters();
            return Ok(value);
        }
        if state.stopped {
            Err(TryPopError::Stopped)
        } else {
            Err(TryPopError::Empty)
        }
    }

    /// Stop the buffer and wake every waiter. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        drop(state);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// True once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// True if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_ordering() {
        let ring = Ringbuffer::new(8);
        for i in 0..5 {
            ring.push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(ring.pop().unwrap(), i);
        }
    }

    #[test]
    fn try_push_full_returns_value() {
        let ring = Ringbuffer::new(2);
        ring.try_push(1).unwrap();
        ring.try_push(2).unwrap();
        match ring.try_push(3) {
            Err(TryPushError::Full(v)) => assert_eq!(v, 3),
            other => panic!("expected Full, got {other:?}"),
        }
    }

    #[test]
    fn try_pop_empty() {
        let ring = Ringbuffer::<u32>::new(2);
        assert_eq!(ring.try_pop(), Err(TryPopError::Empty));
    }

    #[test]
    fn stop_drains_then_fails() {
        let ring = Ringbuffer::new(4);
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        ring.stop();

        assert_eq!(ring.pop().unwrap(), 1);
        assert_eq!(ring.pop().unwrap(), 2);
        assert_eq!(ring.pop(), Err(PopError));

        match ring.push(3) {
            Err(PushError(v)) => assert_eq!(v, 3),
            Ok(()) => panic!("push after stop must fail"),
        }
    }

    #[test]
    fn stop_is_idempotent() {
        let ring = Ringbuffer::<u32>::new(1);
        ring.stop();
        ring.stop();
        assert!(ring.is_stopped());
    }

    #[test]
    fn blocked_pop_wakes_on_push() {
        let ring = Arc::new(Ringbuffer::new(1));
        let consumer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || ring.pop())
        };
        std::thread::sleep(Duration::from_millis(20));
        ring.push(99u32).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap(), 99);
    }

    #[test]
    fn blocked_push_wakes_on_stop() {
        let ring = Arc::new(Ringbuffer::new(1));
        ring.push(1u32).unwrap();
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || ring.push(2))
        };
        std::thread::sleep(Duration::from_millis(20));
        ring.stop();
        assert!(producer.join().unwrap().is_err());
    }

    #[test]
    fn blocked_push_wakes_on_pop() {
        let ring = Arc::new(Ringbuffer::new(1));
        ring.push(1u32).unwrap();
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || ring.push(2))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ring.pop().unwrap(), 1);
        producer.join().unwrap().unwrap();
        assert_eq!(ring.pop().unwrap(), 2);
    }

    #[tokio::test]
    async fn async_fifo_ordering() {
        let ring = AsyncRingbuffer::new(4);
        for i in 0..4 {
            ring.push(i).await.unwrap();
        }
        for i in 0..4 {
            assert_eq!(ring.pop().await.unwrap(), i);
        }
    }

    #[tokio::test]
    async fn async_pop_waits_for_push() {
        let ring = Arc::new(AsyncRingbuffer::new(1));
        let consumer = {
            let ring = Arc::clone(&ring);
            tokio::spawn(async move { ring.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        ring.push(7u32).await.unwrap();
        assert_eq!(consumer.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn async_push_waits_for_capacity() {
        let ring = Arc::new(AsyncRingbuffer::new(1));
        ring.push(1u32).await.unwrap();
        let producer = {
            let ring = Arc::clone(&ring);
            tokio::spawn(async move { ring.push(2).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ring.pop().await.unwrap(), 1);
        producer.await.unwrap().unwrap();
        assert_eq!(ring.pop().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn async_stop_wakes_waiters() {
        let ring = Arc::new(AsyncRingbuffer::<u32>::new(1));
        let consumer = {
            let ring = Arc::clone(&ring);
            tokio::spawn(async move { ring.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        ring.stop();
        assert_eq!(consumer.await.unwrap(), Err(PopError));
    }

    #[tokio::test]
    async fn async_stop_drains_then_fails() {
        let ring = AsyncRingbuffer::new(4);
        ring.push(1u32).await.unwrap();
        ring.stop();
        assert_eq!(ring.pop().await.unwrap(), 1);
        assert_eq!(ring.pop().await, Err(PopError));
        assert!(ring.push(2).await.is_err());
    }
}
