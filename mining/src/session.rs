//! Per-connection session wrapper (spec.md §4.2): couples the protocol-
//! agnostic `gantry_core::Session` with its outbound write queue and
//! per-session rate limiter.

use std::time::Instant;

use gantry_core::Session;
use tokio::sync::mpsc;

use crate::protocol::{Notification, Response};

/// Token bucket limiting inbound JSON-RPC messages per session
/// (spec.md §4.2: "token bucket, default 100 messages/s per session").
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_s: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_s: u32) -> Self {
        let rate = rate_per_s.max(1) as f64;
        TokenBucket {
            capacity: rate,
            tokens: rate,
            refill_per_s: rate,
            last_refill: Instant::now(),
        }
    }

    /// Refills from elapsed time, then takes one token if available.
    pub fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_s).min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// A live Stratum connection: core session state, its single-writer
/// outbound queue (spec.md §4.2: "writes to a session must be serialized
/// per-session to preserve ordering"), and its inbound rate limiter.
pub struct StratumSession {
    pub core: Session,
    pub outbound: mpsc::Sender<String>,
    pub rate: TokenBucket,
    pub rate_violations: u32,
}

impl StratumSession {
    pub fn new(core: Session, outbound: mpsc::Sender<String>, messages_per_s: u32) -> Self {
        StratumSession {
            core,
            outbound,
            rate: TokenBucket::new(messages_per_s),
            rate_violations: 0,
        }
    }

    pub async fn send_response(&self, response: &Response) {
        let _ = self.outbound.send(response.to_line()).await;
    }

    pub async fn send_notification(&self, notification: &Notification) {
        let _ = self.outbound.send(notification.to_line()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_starts_full_and_drains_to_empty() {
        let mut b = TokenBucket::new(2);
        assert!(b.try_take());
        assert!(b.try_take());
        assert!(!b.try_take());
    }
}
