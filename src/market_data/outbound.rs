// Bounded per-client outbound queue with drop-oldest overflow.
// Producers never wait: a full queue sheds its oldest frame instead.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A serialized server frame, shared by every queue it is delivered to.
pub type Frame = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Queued after evicting the oldest pending frame.
    DroppedOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("outbound queue is closed")]
pub struct QueueClosed;

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<Frame>,
    closed: bool,
    dropped: u64,
}

#[derive(Debug)]
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity.min(1024)),
                ..QueueState::default()
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    pub fn push(&self, frame: Frame) -> Result<Enqueued, QueueClosed> {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueClosed);
            }
            let outcome = if state.frames.len() >= self.capacity {
                state.frames.pop_front();
                state.dropped += 1;
                Enqueued::DroppedOldest
            } else {
                Enqueued::Queued
            };
            state.frames.push_back(frame);
            outcome
        };
        self.notify.notify_one();
        Ok(outcome)
    }

    /// Waits for the next frame. Returns `None` once the queue is closed and
    /// everything queued before the close has been handed out.
    pub async fn pop(&self) -> Option<Frame> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            // notify_one leaves a permit when nobody is waiting, so a push
            // between the check above and this await is not lost
            self.notify.notified().await;
        }
    }

    /// Stops accepting frames; already queued frames can still be drained.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    /// Stops accepting frames and throws away anything pending.
    pub fn discard(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.frames.clear();
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames evicted so far because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}
