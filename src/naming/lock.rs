//! FIFO-fair reader/writer lock for tree nodes.
//!
//! A plain mutex guards the counters and a queue of pending waiters; grants
//! are delivered through oneshot wakers. An acquirer that cannot proceed
//! immediately always enters the queue, so a waiter arriving behind a queued
//! writer blocks even while the current holders are readers — no starvation
//! in either direction.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

pub struct QueueLock {
    state: Mutex<LockState>,
}

#[derive(Default)]
struct LockState {
    holders: usize,
    exclusive: bool,
    queue: VecDeque<Waiter>,
}

struct Waiter {
    exclusive: bool,
    wake: oneshot::Sender<()>,
}

impl QueueLock {
    pub fn new() -> Self {
        QueueLock { state: Mutex::new(LockState::default()) }
    }

    /// Acquires the lock in shared (`false`) or exclusive (`true`) mode,
    /// blocking until granted.
    pub async fn acquire(&self, exclusive: bool) {
        let pending = {
            let mut state = self.lock_state();
            while state.queue.front().is_some_and(|waiter| waiter.wake.is_closed()) {
                state.queue.pop_front();
            }
            let free_now = if exclusive {
                state.queue.is_empty() && state.holders == 0
            } else {
                state.queue.is_empty() && (state.holders == 0 || !state.exclusive)
            };
            if free_now {
                state.holders += 1;
                state.exclusive = exclusive;
                None
            } else {
                let (wake, granted) = oneshot::channel();
                state.queue.push_back(Waiter { exclusive, wake });
                Some(granted)
            }
        };
        if let Some(granted) = pending {
            // The granter updates the counters before waking, so by the time
            // this resolves the lock is already held on our behalf.
            let _ = granted.await;
        }
    }

    /// Releases one holder; the last one out hands the lock to the head of
    /// the queue — a single writer, or every reader up to the next writer.
    pub fn release(&self) {
        let mut state = self.lock_state();
        debug_assert!(state.holders > 0, "release without a holder");
        state.holders = state.holders.saturating_sub(1);
        if state.holders == 0 {
            state.exclusive = false;
            grant_next(&mut state);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for QueueLock {
    fn default() -> Self {
        QueueLock::new()
    }
}

fn grant_next(state: &mut LockState) {
    while let Some(front) = state.queue.front() {
        if front.exclusive {
            if state.holders > 0 {
                break;
            }
            let waiter = match state.queue.pop_front() {
                Some(waiter) => waiter,
                None => break,
            };
            // A dead waiter (acquire future dropped) is skipped.
            if waiter.wake.send(()).is_ok() {
                state.holders = 1;
                state.exclusive = true;
                break;
            }
        } else {
            let waiter = match state.queue.pop_front() {
                Some(waiter) => waiter,
                None => break,
            };
            if waiter.wake.send(()).is_ok() {
                state.holders += 1;
                state.exclusive = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn readers_share() {
        let lock = QueueLock::new();
        lock.acquire(false).await;
        lock.acquire(false).await;
        lock.release();
        lock.release();
    }

    #[tokio::test(start_paused = true)]
    async fn writer_waits_for_readers() {
        let lock = Arc::new(QueueLock::new());
        lock.acquire(false).await;

        let writer = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire(true).await })
        };
        settle().await;
        assert!(!writer.is_finished());

        lock.release();
        timeout(Duration::from_secs(1), writer).await.unwrap().unwrap();
        lock.release();
    }

    #[tokio::test(start_paused = true)]
    async fn reader_behind_queued_writer_waits() {
        let lock = Arc::new(QueueLock::new());
        lock.acquire(false).await;

        let order = Arc::new(AtomicUsize::new(0));
        let writer_turn = {
            let (lock, order) = (lock.clone(), order.clone());
            tokio::spawn(async move {
                lock.acquire(true).await;
                let turn = order.fetch_add(1, Ordering::SeqCst);
                lock.release();
                turn
            })
        };
        settle().await;

        let reader_turn = {
            let (lock, order) = (lock.clone(), order.clone());
            tokio::spawn(async move {
                lock.acquire(false).await;
                let turn = order.fetch_add(1, Ordering::SeqCst);
                lock.release();
                turn
            })
        };
        settle().await;
        // The late reader must queue behind the writer even though the
        // current holder is a reader.
        assert!(!writer_turn.is_finished());
        assert!(!reader_turn.is_finished());

        lock.release();
        let writer_turn = timeout(Duration::from_secs(1), writer_turn).await.unwrap().unwrap();
        let reader_turn = timeout(Duration::from_secs(1), reader_turn).await.unwrap().unwrap();
        assert!(writer_turn < reader_turn);
    }

    #[tokio::test(start_paused = true)]
    async fn release_wakes_a_batch_of_readers() {
        let lock = Arc::new(QueueLock::new());
        lock.acquire(true).await;

        let granted = Arc::new(AtomicUsize::new(0));
        let mut readers = Vec::new();
        for _ in 0..3 {
            let (lock, granted) = (lock.clone(), granted.clone());
            readers.push(tokio::spawn(async move {
                lock.acquire(false).await;
                granted.fetch_add(1, Ordering::SeqCst);
            }));
        }
        settle().await;
        assert_eq!(granted.load(Ordering::SeqCst), 0);

        lock.release();
        settle().await;
        assert_eq!(granted.load(Ordering::SeqCst), 3);
        for reader in readers {
            reader.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_waiter_is_skipped() {
        let lock = Arc::new(QueueLock::new());
        lock.acquire(true).await;

        let abandoned = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire(true).await })
        };
        settle().await;
        abandoned.abort();
        settle().await;

        let writer = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire(true).await })
        };
        settle().await;

        lock.release();
        timeout(Duration::from_secs(1), writer).await.unwrap().unwrap();
        lock.release();
    }
}
