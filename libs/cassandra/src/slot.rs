use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::driver::Connection;

/// What a checkout took out of a slot.
pub enum Acquired {
    /// A live connection ready for use
    Established(Arc<dyn Connection>),

    /// Free capacity that must be backed by dialing a new connection
    Token,
}

impl fmt::Debug for Acquired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Acquired::Established(_) => f.write_str("Established"),
            Acquired::Token => f.write_str("Token"),
        }
    }
}

/// Snapshot of a slot's queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCounts {
    pub established: usize,
    pub unestablished: usize,
}

struct SlotState {
    established: VecDeque<Arc<dyn Connection>>,
    unestablished: usize,
}

/// Per-host connection capacity.
///
/// Holds ready connections in an established queue and free capacity as
/// unestablished tokens. Everything taken out must go back exactly once,
/// either as a connection through [`put_established`](Self::put_established)
/// or as a token through [`restore_token`](Self::restore_token), so
/// `established + unestablished + checked_out` never exceeds the capacity.
pub struct ConnectionSlot {
    capacity: usize,
    state: Mutex<SlotState>,
    available: Notify,
    closed: AtomicBool,
}

impl ConnectionSlot {
    /// Create a slot whose whole capacity is unestablished
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(SlotState {
                established: VecDeque::with_capacity(capacity),
                unestablished: capacity,
            }),
            available: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a ready connection without waiting
    pub fn try_take_established(&self) -> Option<Arc<dyn Connection>> {
        self.lock().established.pop_front()
    }

    /// Take a ready connection or, failing that, a token, waiting up to
    /// `timeout` for either to be returned.
    ///
    /// Returns `None` when the wait budget runs out or the slot is closed.
    pub async fn acquire(&self, timeout: Duration) -> Option<Acquired> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so a return between the check and
            // the await still wakes us
            notified.as_mut().enable();

            if self.is_closed() {
                return None;
            }
            if let Some(acquired) = self.try_acquire() {
                return Some(acquired);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return if self.is_closed() { None } else { self.try_acquire() };
            }
        }
    }

    fn try_acquire(&self) -> Option<Acquired> {
        let mut state = self.lock();
        if let Some(conn) = state.established.pop_front() {
            return Some(Acquired::Established(conn));
        }
        if state.unestablished > 0 {
            state.unestablished -= 1;
            return Some(Acquired::Token);
        }
        None
    }

    /// Return a live connection to the established queue
    pub fn put_established(&self, conn: Arc<dyn Connection>) {
        self.lock().established.push_back(conn);
        self.available.notify_one();
    }

    /// Give back capacity whose connection was never dialed or was lost
    pub fn restore_token(&self) {
        let mut state = self.lock();
        state.unestablished = (state.unestablished + 1).min(self.capacity);
        drop(state);
        self.available.notify_one();
    }

    /// Wrap a token just taken out of this slot so it comes back if the
    /// dial backing it never completes
    pub fn reserved(&self) -> ReservedToken<'_> {
        ReservedToken {
            slot: self,
            committed: false,
        }
    }

    /// Stop handing out capacity and wake every waiting `acquire`
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn counts(&self) -> SlotCounts {
        let state = self.lock();
        SlotCounts {
            established: state.established.len(),
            unestablished: state.unestablished,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A token on its way to becoming a connection.
///
/// Restored to the slot on drop, including when the future dialing for it
/// is cancelled, unless [`commit`](Self::commit) consumed it first.
pub struct ReservedToken<'a> {
    slot: &'a ConnectionSlot,
    committed: bool,
}

impl ReservedToken<'_> {
    /// The token is now backed by a dialed connection
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ReservedToken<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.slot.restore_token();
        }
    }
}

impl fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSlot")
            .field("capacity", &self.capacity)
            .field("counts", &self.counts())
            .field("closed", &self.is_closed())
            .finish()
    }
}
