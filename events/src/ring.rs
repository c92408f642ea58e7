//! Single-writer ring buffer the hot path pushes events into without ever
//! blocking (spec.md §4.5). Backed by a mutex rather than a true lock-free
//! structure; the critical section is a fixed-size push/pop with no
//! allocation on the hot path, which is what the "must never block"
//! requirement actually needs in a cooperative-async runtime.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use gantry_core::Event;
use tokio::sync::Notify;

pub struct EventRing {
    capacity: usize,
    buffer: Mutex<VecDeque<Event>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        EventRing {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Pushes one event, dropping the oldest unread one if the ring is full
    /// (spec.md §4.5 "the producer drops the oldest unread event").
    pub fn push(&self, event: Event) {
        let mut buf = self.buffer.lock().expect("event ring mutex poisoned");
        if buf.len() >= self.capacity {
            buf.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buf.push_back(event);
        drop(buf);
        self.notify.notify_one();
    }

    /// Drains every currently-buffered event, waiting for at least one if
    /// the ring is empty.
    pub async fn drain(&self) -> Vec<Event> {
        loop {
            {
                let mut buf = self.buffer.lock().expect("event ring mutex poisoned");
                if !buf.is_empty() {
                    return buf.drain(..).collect();
                }
            }
            self.notify.notified().await;
        }
    }

    /// Drains whatever is currently buffered without waiting for more,
    /// for a shutdown flush.
    pub fn try_drain(&self) -> Vec<Event> {
        let mut buf = self.buffer.lock().expect("event ring mutex poisoned");
        buf.drain(..).collect()
    }

    /// Reads and resets the dropped-event counter.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::EventPayload;

    fn ev(n: u64) -> Event {
        Event::new(n as u128, "us-east", EventPayload::EventsDropped { count: n })
    }

    #[test]
    fn push_beyond_capacity_drops_oldest_and_counts_it() {
        let ring = EventRing::new(2);
        ring.push(ev(1));
        ring.push(ev(2));
        ring.push(ev(3));
        assert_eq!(ring.take_dropped(), 1);
    }

    #[tokio::test]
    async fn drain_returns_everything_buffered() {
        let ring = EventRing::new(4);
        ring.push(ev(1));
        ring.push(ev(2));
        let drained = ring.drain().await;
        assert_eq!(drained.len(), 2);
    }
}
