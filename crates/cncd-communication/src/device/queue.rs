//! Bounded async line queue
//!
//! Used both as the outbound queue (capacity 1) and as the pending
//! acknowledgement window (capacity = firmware buffer depth). Producers
//! block in [`LineQueue::push`] while the queue is full; consumers block in
//! [`LineQueue::pop`] while it is empty. `join` waits until every pushed
//! line has been marked done with `task_done`.
//!
//! Every `drain` starts a new epoch. A consumer holding a popped line can
//! compare epochs to learn that the line was flushed while it waited.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<String>,
    unfinished: usize,
    epoch: u64,
}

#[derive(Debug)]
pub struct LineQueue {
    state: Mutex<QueueState>,
    changed: Notify,
    capacity: usize,
}

impl LineQueue {
    /// Create a queue holding at most `capacity` lines (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            changed: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lines pushed but not yet marked done
    pub fn unfinished(&self) -> usize {
        self.state.lock().unfinished
    }

    /// Append a line, waiting for room
    pub async fn push(&self, line: String) {
        loop {
            // Register before checking so a wakeup in between is not lost
            let notified = self.changed.notified();
            {
                let mut state = self.state.lock();
                if state.items.len() < self.capacity {
                    state.items.push_back(line);
                    state.unfinished += 1;
                    drop(state);
                    self.changed.notify_waiters();
                    return;
                }
            }
            notified.await;
        }
    }

    /// Take the oldest line, waiting for one to arrive
    pub async fn pop(&self) -> String {
        self.pop_tagged().await.0
    }

    /// Take the oldest line together with the epoch it was taken in
    pub async fn pop_tagged(&self) -> (String, u64) {
        loop {
            let notified = self.changed.notified();
            let taken = {
                let mut state = self.state.lock();
                let epoch = state.epoch;
                state.items.pop_front().map(|line| (line, epoch))
            };
            if let Some(taken) = taken {
                self.changed.notify_waiters();
                return taken;
            }
            notified.await;
        }
    }

    /// Number of drains so far
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Take the oldest line if there is one
    pub fn try_pop(&self) -> Option<String> {
        let line = self.state.lock().items.pop_front();
        if line.is_some() {
            self.changed.notify_waiters();
        }
        line
    }

    /// Discard every queued line, counting them as done
    pub fn drain(&self) -> Vec<String> {
        let drained: Vec<String> = {
            let mut state = self.state.lock();
            let drained: Vec<String> = state.items.drain(..).collect();
            state.unfinished = state.unfinished.saturating_sub(drained.len());
            state.epoch += 1;
            drained
        };
        self.changed.notify_waiters();
        drained
    }

    /// Mark one popped line as fully processed
    pub fn task_done(&self) {
        {
            let mut state = self.state.lock();
            state.unfinished = state.unfinished.saturating_sub(1);
        }
        self.changed.notify_waiters();
    }

    /// Wait until every pushed line has been marked done
    pub async fn join(&self) {
        loop {
            let notified = self.changed.notified();
            if self.state.lock().unfinished == 0 {
                return;
            }
            notified.await;
        }
    }
}
