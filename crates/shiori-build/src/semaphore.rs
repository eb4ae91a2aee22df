use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Counting semaphore with a strict FIFO waiter queue.
///
/// A freed permit is handed directly to the waiter at the head of the
/// queue instead of going back into the pool, so arrival order is
/// admission order. No timeouts, no priorities.
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    permits: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// RAII guard returned by [`Semaphore::acquire_owned`]; releases its
/// permit on drop, whatever path the holder exits through.
#[derive(Debug)]
pub struct SemaphorePermit {
    semaphore: Arc<Semaphore>,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(State {
                permits,
                waiters: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Holders never panic while the lock is held; recover the state
        // rather than propagating poison.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for a permit. Returns immediately when one is available,
    /// otherwise queues behind earlier callers.
    pub async fn acquire(&self) {
        let rx = {
            let mut state = self.lock();
            if state.permits > 0 {
                state.permits -= 1;
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        // The sender is only dropped when the semaphore itself goes
        // away; either way the waiter is unblocked.
        let _ = rx.await;
    }

    /// Return a permit. The head waiter, if any, is admitted directly;
    /// a waiter that gave up waiting is skipped and the next one tried.
    pub fn release(&self) {
        let mut state = self.lock();
        loop {
            match state.waiters.pop_front() {
                Some(waiter) => {
                    if waiter.send(()).is_ok() {
                        return;
                    }
                }
                None => {
                    state.permits += 1;
                    return;
                }
            }
        }
    }

    /// Acquire with a guard that releases on drop.
    pub async fn acquire_owned(self: &Arc<Self>) -> SemaphorePermit {
        self.acquire().await;
        SemaphorePermit {
            semaphore: Arc::clone(self),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.lock().permits
    }
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
