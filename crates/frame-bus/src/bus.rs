//! Frame Bus Implementation

use frame_protocol::Frame;
use ring_buffer::{BufferId, RingBuffer};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, trace};

/// Subscriber-owned buffer of decoded frames
pub type FrameBuffer = RingBuffer<Frame>;

/// A registration; the bus never keeps the buffer alive
struct Subscriber {
    id: BufferId,
    buffer: Weak<FrameBuffer>,
}

/// Registry of subscriber buffers with fan-out publishing
///
/// Subscribers are identified by [`BufferId`], never by contents. Each
/// subscriber owns its buffer; once the owner drops it the registration is
/// pruned on the next publish.
#[derive(Default)]
pub struct FrameBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl FrameBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a buffer; returns false if it is already registered
    pub fn subscribe(&self, buffer: &Arc<FrameBuffer>) -> bool {
        let mut subscribers = self.registry();
        let id = buffer.id();
        if subscribers.iter().any(|sub| sub.id == id) {
            return false;
        }

        subscribers.push(Subscriber {
            id,
            buffer: Arc::downgrade(buffer),
        });
        info!(subscriber = %id, total = subscribers.len(), "Frame subscriber registered");
        true
    }

    /// Remove a registration; returns false if the buffer was not registered
    pub fn unsubscribe(&self, buffer: &FrameBuffer) -> bool {
        let mut subscribers = self.registry();
        let id = buffer.id();
        let before = subscribers.len();
        subscribers.retain(|sub| sub.id != id);

        let removed = subscribers.len() < before;
        if removed {
            info!(subscriber = %id, total = subscribers.len(), "Frame subscriber removed");
        }
        removed
    }

    /// Push a frame into every registered buffer
    ///
    /// A full subscriber drops the frame without affecting the others.
    /// Returns the number of subscribers that accepted it.
    pub fn publish(&self, frame: &Frame) -> usize {
        let mut subscribers = self.registry();
        let mut delivered = 0;

        subscribers.retain(|sub| match sub.buffer.upgrade() {
            Some(buffer) => {
                if buffer.write(std::slice::from_ref(frame)) > 0 {
                    delivered += 1;
                } else {
                    trace!(subscriber = %sub.id, "Subscriber buffer full, frame dropped");
                }
                true
            }
            None => {
                debug!(subscriber = %sub.id, "Pruning registration of released buffer");
                false
            }
        });

        delivered
    }

    /// Number of registered buffers still alive
    pub fn subscriber_count(&self) -> usize {
        self.registry()
            .iter()
            .filter(|sub| sub.buffer.strong_count() > 0)
            .count()
    }

    /// Check whether a buffer is registered
    pub fn is_subscribed(&self, buffer: &FrameBuffer) -> bool {
        let id = buffer.id();
        self.registry().iter().any(|sub| sub.id == id)
    }
}
