//! Variance difficulty engine (spec.md §4.4): keeps a session's share rate
//! near a configured target without oscillation.

use log::debug;

use gantry_util::VardiffConfig;

/// Outcome of feeding one accepted share into the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    Unchanged,
    Changed { old: f64, new: f64 },
}

/// Mutable per-session state the engine reads and updates. Kept here rather
/// than on `gantry_core::Session` directly so the algorithm is testable in
/// isolation from the session/connection machinery.
#[derive(Debug, Clone)]
pub struct VardiffState {
    pub difficulty: f64,
    pub ema_rate: f64,
    pub last_share_at: Option<f64>,
    pub last_adjustment_at: f64,
    pub adjustment_count: u32,
    pub stable_intervals: u64,
}

impl VardiffState {
    pub fn new(initial_difficulty: f64, now: f64) -> Self {
        VardiffState {
            difficulty: initial_difficulty,
            ema_rate: 0.0,
            last_share_at: None,
            last_adjustment_at: now,
            adjustment_count: 0,
            stable_intervals: 0,
        }
    }
}

/// Applies one accepted share at time `now` (seconds, monotonic within a
/// session) to `state`, per the spec.md §4.4 algorithm. `min_diff`/`max_diff`
/// are the absolute clamp bounds (carried on the top-level config rather than
/// `VardiffConfig`, see spec.md §6).
pub fn on_share_accepted(
    state: &mut VardiffState,
    cfg: &VardiffConfig,
    min_diff: f64,
    max_diff: f64,
    now: f64,
) -> Adjustment {
    // Step 1: update the EMA rate.
    if let Some(last) = state.last_share_at {
        let elapsed = (now - last).max(f64::EPSILON);
        let instantaneous = 1.0 / elapsed;
        state.ema_rate = if state.ema_rate == 0.0 {
            instantaneous
        } else {
            cfg.ema_alpha * instantaneous + (1.0 - cfg.ema_alpha) * state.ema_rate
        };
    } else {
        // First observation: no prior interval to measure, ema stays at 0
        // until the second share arrives (spec.md §4.4 step 1 "first
        // observation initializes to instantaneous" applies to the rate
        // computed from the *first measured interval*, i.e. share #2).
    }
    state.last_share_at = Some(now);

    if state.ema_rate == 0.0 {
        return Adjustment::Unchanged;
    }

    // Step 2: ratio of measured to target rate.
    let target_rate = 1.0 / cfg.target_interval_s;
    let ratio = state.ema_rate / target_rate;

    // Step 3: dead band.
    if ratio >= cfg.dead_band_low && ratio <= cfg.dead_band_high {
        state.stable_intervals += 1;
        return Adjustment::Unchanged;
    }

    // Step 4: cooldown.
    if now - state.last_adjustment_at < cfg.cooldown_s as f64 {
        return Adjustment::Unchanged;
    }

    // Step 5: compute new difficulty.
    state.stable_intervals = 0;
    let old = state.difficulty;
    let new_unclamped = if state.adjustment_count < 3 && ratio > cfg.fast_ramp_threshold {
        old * ratio.min(cfg.fast_ramp_max_jump)
    } else {
        old * (1.0 + (ratio - 1.0) * cfg.dampening)
    };

    // Step 6: clamp and, if changed, record the adjustment.
    let new = new_unclamped.clamp(min_diff, max_diff);
    state.last_adjustment_at = now;
    state.adjustment_count += 1;

    if new == old {
        return Adjustment::Unchanged;
    }
    state.difficulty = new;
    debug!("vardiff: {old:.4} -> {new:.4} (ratio={ratio:.3})");
    Adjustment::Changed { old, new }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> VardiffConfig {
        VardiffConfig {
            target_interval_s: 10.0,
            ema_alpha: 0.3,
            dead_band_low: 0.8,
            dead_band_high: 1.2,
            dampening: 0.5,
            cooldown_s: 30,
            fast_ramp_threshold: 4.0,
            fast_ramp_max_jump: 64.0,
            reconnect_ttl_s: 86_400,
        }
    }

    #[test]
    fn first_share_never_adjusts() {
        let mut s = VardiffState::new(1.0, 0.0);
        let r = on_share_accepted(&mut s, &cfg(), 0.001, 1e9, 0.0);
        assert_eq!(r, Adjustment::Unchanged);
        assert_eq!(s.ema_rate, 0.0);
    }

    #[test]
    fn rate_within_dead_band_leaves_difficulty_unchanged() {
        let mut s = VardiffState::new(1.0, 0.0);
        on_share_accepted(&mut s, &cfg(), 0.001, 1e9, 0.0);
        let r = on_share_accepted(&mut s, &cfg(), 0.001, 1e9, 10.0);
        assert_eq!(r, Adjustment::Unchanged);
        assert_eq!(s.stable_intervals, 1);
    }

    #[test]
    fn sustained_fast_rate_ramps_multiplicatively_for_first_three_adjustments() {
        let c = cfg();
        let mut s = VardiffState::new(1.0, 0.0);
        on_share_accepted(&mut s, &c, 0.001, 1e9, 0.0);
        // Shares arriving every 1s vs a 10s target: ratio = 10, over fast_ramp_threshold=4.
        let r = on_share_accepted(&mut s, &c, 0.001, 1e9, 1.0);
        match r {
            Adjustment::Changed { old, new } => {
                assert_eq!(old, 1.0);
                assert!(new > old, "fast ramp should increase difficulty");
            }
            Adjustment::Unchanged => panic!("expected a ramp adjustment"),
        }
        assert_eq!(s.adjustment_count, 1);
    }

    #[test]
    fn cooldown_suppresses_a_second_adjustment_too_soon() {
        let c = cfg();
        let mut s = VardiffState::new(1.0, 0.0);
        on_share_accepted(&mut s, &c, 0.001, 1e9, 0.0);
        on_share_accepted(&mut s, &c, 0.001, 1e9, 1.0); // first adjustment at t=1
        let r = on_share_accepted(&mut s, &c, 0.001, 1e9, 2.0); // well within cooldown_s=30
        assert_eq!(r, Adjustment::Unchanged);
    }

    #[test]
    fn difficulty_never_exceeds_max_diff() {
        let c = cfg();
        let mut s = VardiffState::new(1.0, 0.0);
        on_share_accepted(&mut s, &c, 0.001, 5.0, 0.0);
        let r = on_share_accepted(&mut s, &c, 0.001, 5.0, 1.0);
        if let Adjustment::Changed { new, .. } = r {
            assert!(new <= 5.0);
        }
    }

    #[test]
    fn slow_rate_after_cooldown_dampens_downward() {
        let c = cfg();
        let mut s = VardiffState::new(100.0, 0.0);
        on_share_accepted(&mut s, &c, 0.001, 1e9, 0.0);
        // One share every 40s vs a 10s target: ratio = 0.25, below dead band.
        let r = on_share_accepted(&mut s, &c, 0.001, 1e9, 40.0);
        match r {
            Adjustment::Changed { old, new } => {
                assert_eq!(old, 100.0);
                assert!(new < old);
            }
            Adjustment::Unchanged => panic!("expected a dampened downward adjustment"),
        }
    }
}
