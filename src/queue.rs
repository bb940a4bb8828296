//! Bounded command queue and the latest-wins frame relay
//!
//! Both buffers prefer fresh input over stale input: the command queue evicts
//! its oldest entry when full, and the frame relay only ever holds the most
//! recent frame. Producers never block on either.

use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::types::{Frame, RawUtterance};

/// Bounded FIFO of raw utterances with a drop-oldest overflow policy. In a
/// live-control system a stale command is worse than a lost one.
pub struct CommandQueue {
    items: Mutex<VecDeque<RawUtterance>>,
    capacity: usize,
    available: Notify,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            available: Notify::new(),
        }
    }

    /// Adds an utterance, evicting the oldest queued one if at capacity.
    pub fn enqueue(&self, item: RawUtterance) {
        {
            let mut items = self.items.lock();
            if items.len() == self.capacity {
                if let Some(stale) = items.pop_front() {
                    log::debug!(
                        "command queue full, dropping stale {} item: '{}'",
                        stale.modality,
                        stale.text
                    );
                }
            }
            items.push_back(item);
        }
        self.available.notify_one();
    }

    /// Waits up to `timeout` for an utterance. Returns None on timeout, which
    /// bounds how long the consumer can be blind to a shutdown signal.
    pub async fn dequeue(&self, timeout: Duration) -> Option<RawUtterance> {
        tokio::time::timeout(timeout, self.wait_for_item()).await.ok()
    }

    async fn wait_for_item(&self) -> RawUtterance {
        loop {
            if let Some(item) = self.items.lock().pop_front() {
                return item;
            }
            // notify_one stores a permit, so an enqueue racing this await
            // still wakes us.
            self.available.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// Capacity-1 latest-wins slot for sharing the freshest camera frame with the
/// vision-query path. Non-blocking on both sides.
pub struct FrameRelay {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
}

impl FrameRelay {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// Stores a frame, overwriting any unconsumed one.
    pub fn put(&self, frame: Frame) {
        if let Err(TrySendError::Full(frame)) = self.tx.try_send(frame) {
            let _ = self.rx.try_recv();
            let _ = self.tx.try_send(frame);
        }
    }

    /// Takes the stored frame, if any. Never blocks.
    pub fn try_take(&self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

impl Default for FrameRelay {
    fn default() -> Self {
        Self::new()
    }
}
