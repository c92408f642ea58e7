//! Lock-free counters exposed in Prometheus text format (spec.md §4.8).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Every counter the pool exposes on `/metrics`. All fields are atomics so
/// the hot path can update them without a lock and the HTTP handler can
/// read them without blocking a producer.
#[derive(Default)]
pub struct MetricsRegistry {
    accepted_shares: AtomicU64,
    rejected_shares: AtomicU64,
    stale_shares: AtomicU64,
    blocks_found: AtomicU64,
    connected_miners: AtomicI64,
    block_height: AtomicU64,
    bitcoin_connected: AtomicBool,
    asicboost_sessions: AtomicI64,
    /// Accumulated accepted difficulty, fixed-point at 1e6 since atomics
    /// don't come in a float flavor.
    total_accepted_difficulty_micros: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted_share(&self, difficulty: f64) {
        self.accepted_shares.fetch_add(1, Ordering::Relaxed);
        let micros = (difficulty * 1_000_000.0).round().max(0.0) as u64;
        self.total_accepted_difficulty_micros
            .fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_rejected_share(&self, stale: bool) {
        self.rejected_shares.fetch_add(1, Ordering::Relaxed);
        if stale {
            self.stale_shares.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_block_found(&self) {
        self.blocks_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connected_miners(&self, n: i64) {
        self.connected_miners.store(n, Ordering::Relaxed);
    }

    pub fn miner_connected(&self) {
        self.connected_miners.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miner_disconnected(&self) {
        self.connected_miners.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_block_height(&self, height: u64) {
        self.block_height.store(height, Ordering::Relaxed);
    }

    pub fn set_bitcoin_connected(&self, connected: bool) {
        self.bitcoin_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_asicboost_sessions(&self, n: i64) {
        self.asicboost_sessions.store(n, Ordering::Relaxed);
    }

    /// Renders every counter as Prometheus text exposition format.
    pub fn render(&self) -> String {
        let total_diff =
            self.total_accepted_difficulty_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;

        let mut out = String::new();
        out.push_str("# TYPE gantry_accepted_shares_total counter\n");
        out.push_str(&format!(
            "gantry_accepted_shares_total {}\n",
            self.accepted_shares.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE gantry_rejected_shares_total counter\n");
        out.push_str(&format!(
            "gantry_rejected_shares_total {}\n",
            self.rejected_shares.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE gantry_stale_shares_total counter\n");
        out.push_str(&format!(
            "gantry_stale_shares_total {}\n",
            self.stale_shares.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE gantry_blocks_found_total counter\n");
        out.push_str(&format!(
            "gantry_blocks_found_total {}\n",
            self.blocks_found.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE gantry_connected_miners gauge\n");
        out.push_str(&format!(
            "gantry_connected_miners {}\n",
            self.connected_miners.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE gantry_block_height gauge\n");
        out.push_str(&format!(
            "gantry_block_height {}\n",
            self.block_height.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE gantry_bitcoin_connected gauge\n");
        out.push_str(&format!(
            "gantry_bitcoin_connected {}\n",
            self.bitcoin_connected.load(Ordering::Relaxed) as u8
        ));
        out.push_str("# TYPE gantry_asicboost_sessions gauge\n");
        out.push_str(&format!(
            "gantry_asicboost_sessions {}\n",
            self.asicboost_sessions.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE gantry_total_accepted_difficulty gauge\n");
        out.push_str(&format!("gantry_total_accepted_difficulty {total_diff}\n"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_every_counter_name() {
        let reg = MetricsRegistry::new();
        reg.record_accepted_share(2.5);
        reg.record_rejected_share(true);
        reg.record_block_found();
        reg.miner_connected();
        reg.set_block_height(840_000);
        reg.set_bitcoin_connected(true);

        let text = reg.render();
        assert!(text.contains("gantry_accepted_shares_total 1"));
        assert!(text.contains("gantry_rejected_shares_total 1"));
        assert!(text.contains("gantry_stale_shares_total 1"));
        assert!(text.contains("gantry_blocks_found_total 1"));
        assert!(text.contains("gantry_connected_miners 1"));
        assert!(text.contains("gantry_block_height 840000"));
        assert!(text.contains("gantry_bitcoin_connected 1"));
        assert!(text.contains("gantry_total_accepted_difficulty 2.5"));
    }

    #[test]
    fn disconnect_decrements_connected_miners() {
        let reg = MetricsRegistry::new();
        reg.miner_connected();
        reg.miner_connected();
        reg.miner_disconnected();
        assert!(reg.render().contains("gantry_connected_miners 1"));
    }
}
