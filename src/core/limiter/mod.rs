//! FIFO admission queue bounding how many operations run at once.
//!
//! Slots are handed from a finishing operation directly to the oldest waiter under
//! the same lock, so completion and the next admission are a single step and the
//! active count never exceeds the limit.

use crate::core::types::LimiterStats;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LimiterError {
    #[error("max concurrency must be at least 1")]
    InvalidLimit,
    #[error("request was removed from the queue before it could start")]
    Cleared,
}

type Grant = Result<(), LimiterError>;

#[derive(Debug)]
struct QueuedRequest {
    id: u64,
    enqueued_at: Instant,
    grant: oneshot::Sender<Grant>,
}

#[derive(Debug, Default)]
struct LimiterState {
    active: usize,
    queue: VecDeque<QueuedRequest>,
    next_id: u64,
}

#[derive(Debug)]
pub struct ConcurrencyLimiter {
    max_concurrency: usize,
    state: Mutex<LimiterState>,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrency: usize) -> Result<Self, LimiterError> {
        if max_concurrency == 0 {
            return Err(LimiterError::InvalidLimit);
        }
        Ok(Self {
            max_concurrency,
            state: Mutex::new(LimiterState::default()),
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run `runner(request)` once a slot is free.
    ///
    /// Returns [`LimiterError::Cleared`] if the queue was cleared while waiting; the
    /// runner is not invoked in that case.
    pub async fn execute<R, T, F, Fut>(&self, request: R, runner: F) -> Result<T, LimiterError>
    where
        F: FnOnce(R) -> Fut,
        Fut: Future<Output = T>,
    {
        let _slot = self.acquire().await?;
        Ok(runner(request).await)
    }

    /// Reject every queued waiter with [`LimiterError::Cleared`]. Running work is untouched.
    pub fn clear(&self) -> usize {
        let drained: Vec<QueuedRequest> = self.lock().queue.drain(..).collect();
        let count = drained.len();
        for waiter in drained {
            tracing::debug!(
                queue_id = waiter.id,
                waited_ms = waiter.enqueued_at.elapsed().as_millis() as u64,
                "clearing queued request"
            );
            let _ = waiter.grant.send(Err(LimiterError::Cleared));
        }
        count
    }

    pub fn stats(&self) -> LimiterStats {
        let state = self.lock();
        LimiterStats {
            queued: state.queue.len(),
            active: state.active,
            max_concurrency: self.max_concurrency,
        }
    }

    async fn acquire(&self) -> Result<Slot<'_>, LimiterError> {
        let receiver = {
            let mut state = self.lock();
            if state.active < self.max_concurrency {
                state.active += 1;
                return Ok(Slot { limiter: self });
            }
            let (grant, receiver) = oneshot::channel();
            let id = state.next_id;
            state.next_id += 1;
            state.queue.push_back(QueuedRequest {
                id,
                enqueued_at: Instant::now(),
                grant,
            });
            tracing::debug!(
                queue_id = id,
                queued = state.queue.len(),
                active = state.active,
                "concurrency limit reached, request queued"
            );
            receiver
        };

        let mut pending = PendingSlot {
            limiter: self,
            receiver: Some(receiver),
        };
        pending.wait().await
    }

    /// Hand the slot to the oldest live waiter, or free it.
    fn release(&self) {
        let mut state = self.lock();
        while let Some(waiter) = state.queue.pop_front() {
            if waiter.grant.send(Ok(())).is_ok() {
                return;
            }
        }
        state.active = state.active.saturating_sub(1);
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An occupied slot; released on drop, including when the runner panics or is cancelled.
struct Slot<'a> {
    limiter: &'a ConcurrencyLimiter,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

/// A queued waiter. If the caller stops waiting after a slot was already granted,
/// the slot is passed on instead of leaking.
struct PendingSlot<'a> {
    limiter: &'a ConcurrencyLimiter,
    receiver: Option<oneshot::Receiver<Grant>>,
}

impl<'a> PendingSlot<'a> {
    async fn wait(&mut self) -> Result<Slot<'a>, LimiterError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(LimiterError::Cleared);
        };
        let grant = receiver.await;
        self.receiver = None;
        match grant {
            Ok(Ok(())) => Ok(Slot {
                limiter: self.limiter,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(LimiterError::Cleared),
        }
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            if let Ok(Ok(())) = receiver.try_recv() {
                self.limiter.release();
            }
        }
    }
}
