//! Wall-clock to cycle-budget conversion.
//!
//! Each tick the scheduler turns the milliseconds that actually elapsed into a
//! per-millisecond slice budget plus a leftover that is appended to the last
//! slice, so a full tick always owes the guest `cpu_hz / ticks_per_second`
//! cycles even though per-slice integer division rounds down.
//!
//! Two policies exist. [`FixedBudget`] trusts the host sleep. [`AdaptiveBudget`]
//! is a feedback controller for hosts that call the loop on their own cadence
//! (browser animation frames, cooperative main loops): it keeps an estimate
//! between calls and rescales it when the host falls behind.

use crate::config::{BudgetMode, SessionConfig};

/// Budget for one tick, split into one-millisecond slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TickBudget {
    /// Cycles granted to every slice.
    pub per_slice: u32,
    /// Extra cycles granted to the final slice only.
    pub leftover: u32,
    /// Number of one-millisecond slices in this tick (always at least 1).
    pub slices: u32,
}

impl TickBudget {
    /// Cycle budget for slice `index` (`0..slices`).
    #[must_use]
    pub const fn slice_budget(&self, index: u32) -> u32 {
        if index + 1 == self.slices {
            self.per_slice.saturating_add(self.leftover)
        } else {
            self.per_slice
        }
    }

    /// Sum of every slice budget in this tick.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.per_slice as u64 * self.slices as u64 + self.leftover as u64
    }
}

/// How the real-time clock shadow's uptime counter advances per slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UptimeSource {
    /// Add one millisecond per executed slice.
    Counted,
    /// Copy the host's millisecond clock.
    HostClock,
}

/// Strategy that turns elapsed time into a tick budget.
pub trait BudgetPolicy {
    /// Computes the next tick budget.
    ///
    /// `elapsed_ms` is already clamped to at least 1. `estimate` is the
    /// persistent cycles-per-slice feedback state; implementations must leave
    /// it greater than zero.
    fn next_budget(
        &self,
        config: &SessionConfig,
        elapsed_ms: u32,
        estimate: &mut u32,
    ) -> TickBudget;

    /// Source for the guest-visible uptime counter under this policy.
    fn uptime_source(&self) -> UptimeSource;
}

/// Splits one tick's cycles evenly across the elapsed milliseconds.
///
/// Returns `(base, leftover)` with `base * elapsed_ms + leftover == cycles_per_tick`.
#[must_use]
pub const fn split_tick(cycles_per_tick: u32, elapsed_ms: u32) -> (u32, u32) {
    let elapsed_ms = if elapsed_ms == 0 { 1 } else { elapsed_ms };
    let base = cycles_per_tick / elapsed_ms;
    (base, cycles_per_tick - base * elapsed_ms)
}

/// Budget policy for hosts with a trustworthy sleep primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedBudget;

impl BudgetPolicy for FixedBudget {
    fn next_budget(
        &self,
        config: &SessionConfig,
        elapsed_ms: u32,
        estimate: &mut u32,
    ) -> TickBudget {
        let (base, leftover) = split_tick(config.cycles_per_tick(), elapsed_ms);
        let per_slice = base.max(1);
        *estimate = per_slice;
        TickBudget {
            per_slice,
            leftover,
            slices: elapsed_ms.max(1),
        }
    }

    fn uptime_source(&self) -> UptimeSource {
        UptimeSource::Counted
    }
}

/// Feedback controller for hosts whose loop cadence is not under our control.
///
/// Inside the tolerance band the previous estimate is reused unchanged.
/// When the host runs slow the estimate is rescaled by the measured
/// milliseconds-per-cycle cost so a nominal tick's worth of slices still sums
/// to the previous budget. When it runs fast the plain fixed split is used;
/// host pacing already caps the rate. Every call then adds the safety margin
/// and stores `base + leftover` as the next estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveBudget;

impl BudgetPolicy for AdaptiveBudget {
    fn next_budget(
        &self,
        config: &SessionConfig,
        elapsed_ms: u32,
        estimate: &mut u32,
    ) -> TickBudget {
        let elapsed_ms = elapsed_ms.max(1);
        let (mut base, mut leftover) = split_tick(config.cycles_per_tick(), elapsed_ms);

        let target = config.ticks_per_second;
        let achieved = achieved_ticks_per_second(elapsed_ms, config.frames_per_update);
        let band = target * config.tolerance_percent / 100;

        if achieved > target.saturating_sub(band) && achieved < target.saturating_add(band) {
            base = *estimate;
            leftover = 0;
        } else if achieved < target {
            if let Some(rescaled) = rescale_estimate(
                f64::from(elapsed_ms),
                f64::from(*estimate),
                f64::from(target),
            ) {
                base = rescaled;
            }
            leftover = 0;
        }

        leftover = leftover.saturating_add(config.autoadjust_margin);
        *estimate = base.saturating_add(leftover).max(1);

        tracing::trace!(
            elapsed_ms,
            achieved,
            base,
            leftover,
            estimate = *estimate,
            "adaptive budget"
        );

        TickBudget {
            per_slice: base.max(1),
            leftover,
            slices: elapsed_ms,
        }
    }

    fn uptime_source(&self) -> UptimeSource {
        UptimeSource::HostClock
    }
}

/// Ticks per second implied by one tick lasting `elapsed_ms`.
#[must_use]
pub const fn achieved_ticks_per_second(elapsed_ms: u32, frames_per_update: u32) -> u32 {
    let frames_per_update = if frames_per_update == 0 {
        1
    } else {
        frames_per_update
    };
    let per_frame = elapsed_ms / frames_per_update;
    1000 / if per_frame == 0 { 1 } else { per_frame }
}

/// Rescales a cycles-per-slice estimate by the measured per-cycle cost.
///
/// Returns `None` when the intermediate cost is not a normal float, which
/// keeps NaN and infinities out of the budget.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn rescale_estimate(elapsed_ms: f64, estimate: f64, ticks_per_second: f64) -> Option<u32> {
    let ms_per_cycle = elapsed_ms / estimate;
    if !ms_per_cycle.is_normal() {
        return None;
    }
    let rescaled = (1000.0 / ticks_per_second) / ms_per_cycle;
    rescaled.is_finite().then_some(rescaled as u32)
}

/// Pacing bookkeeping owned by the scheduler for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingState {
    /// Host milliseconds when the current tick began.
    pub tick_start: u64,
    /// Host milliseconds when the previous tick's work finished.
    pub tick_end: u64,
    /// Number of completed ticks.
    pub tick_count: u64,
    /// Persistent cycles-per-slice estimate; never zero.
    pub cycles_per_tick_estimate: u32,
}

impl TimingState {
    /// Starts timing at host time `now_ms`.
    #[must_use]
    pub const fn new(now_ms: u64) -> Self {
        Self {
            tick_start: now_ms,
            tick_end: now_ms,
            tick_count: 0,
            cycles_per_tick_estimate: 1,
        }
    }
}

/// Owns the timing state and the selected budget policy.
pub struct TimingScheduler {
    state: TimingState,
    policy: Box<dyn BudgetPolicy>,
}

impl std::fmt::Debug for TimingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingScheduler")
            .field("state", &self.state)
            .field("uptime_source", &self.policy.uptime_source())
            .finish_non_exhaustive()
    }
}

impl TimingScheduler {
    /// Creates a scheduler with an explicit policy.
    #[must_use]
    pub fn new(policy: Box<dyn BudgetPolicy>, now_ms: u64) -> Self {
        Self {
            state: TimingState::new(now_ms),
            policy,
        }
    }

    /// Creates a scheduler with the policy named by `mode`.
    #[must_use]
    pub fn for_mode(mode: BudgetMode, now_ms: u64) -> Self {
        let policy: Box<dyn BudgetPolicy> = match mode {
            BudgetMode::Fixed => Box::new(FixedBudget),
            BudgetMode::Adaptive => Box::new(AdaptiveBudget),
        };
        Self::new(policy, now_ms)
    }

    /// Computes the budget for `elapsed_ms` of wall-clock time.
    pub fn next_budget(&mut self, config: &SessionConfig, elapsed_ms: u64) -> TickBudget {
        let elapsed_ms = u32::try_from(elapsed_ms).unwrap_or(u32::MAX).max(1);
        let budget =
            self.policy
                .next_budget(config, elapsed_ms, &mut self.state.cycles_per_tick_estimate);
        debug_assert!(self.state.cycles_per_tick_estimate > 0);
        budget
    }

    /// Marks the start of a new tick at `now_ms` and returns the elapsed time
    /// since the previous start.
    #[allow(clippy::missing_const_for_fn)]
    pub fn begin_tick(&mut self, now_ms: u64) -> u64 {
        let elapsed = now_ms.saturating_sub(self.state.tick_start);
        self.state.tick_start = now_ms;
        elapsed
    }

    /// Records the end of the current tick's work.
    #[allow(clippy::missing_const_for_fn)]
    pub fn end_tick(&mut self, now_ms: u64) {
        self.state.tick_end = now_ms;
        self.state.tick_count += 1;
    }

    /// Current timing state.
    #[must_use]
    pub const fn state(&self) -> &TimingState {
        &self.state
    }

    /// Uptime behaviour of the active policy.
    #[must_use]
    pub fn uptime_source(&self) -> UptimeSource {
        self.policy.uptime_source()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::{
        achieved_ticks_per_second, rescale_estimate, split_tick, AdaptiveBudget, BudgetPolicy,
        FixedBudget, TickBudget, TimingScheduler, UptimeSource,
    };
    use crate::config::{BudgetMode, SessionConfig};

    fn config_64mhz() -> SessionConfig {
        SessionConfig {
            cpu_hz: 64_000_000,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn fixed_budget_for_sixteen_millisecond_tick() {
        let config = config_64mhz();
        let mut estimate = 1;
        let budget = FixedBudget.next_budget(&config, 16, &mut estimate);

        assert_eq!(budget.per_slice, 66_666);
        assert_eq!(budget.leftover, 1_066_666 - 66_666 * 16);
        assert_eq!(budget.leftover, 10);
        assert_eq!(budget.slices, 16);
        assert_eq!(budget.slice_budget(14), 66_666);
        assert_eq!(budget.slice_budget(15), 66_676);
        assert_eq!(budget.total(), 1_066_666);
    }

    #[test]
    fn zero_elapsed_is_treated_as_one_millisecond() {
        let config = config_64mhz();
        let mut scheduler = TimingScheduler::for_mode(BudgetMode::Fixed, 0);
        let budget = scheduler.next_budget(&config, 0);

        assert_eq!(budget.slices, 1);
        assert_eq!(budget.per_slice, 1_066_666);
        assert_eq!(budget.leftover, 0);
    }

    #[rstest]
    #[case(16, 62)]
    #[case(17, 58)]
    #[case(20, 50)]
    #[case(13, 76)]
    #[case(0, 1000)]
    fn achieved_rate_matches_integer_division(#[case] elapsed: u32, #[case] expected: u32) {
        assert_eq!(achieved_ticks_per_second(elapsed, 1), expected);
    }

    #[test]
    fn rescale_rejects_non_normal_cost() {
        assert_eq!(rescale_estimate(16.0, 0.0, 60.0), None);
        assert_eq!(rescale_estimate(0.0, 1000.0, 60.0), None);
        assert_eq!(rescale_estimate(f64::NAN, 1000.0, 60.0), None);
        assert_eq!(rescale_estimate(20.0, 1300.0, 60.0), Some(1083));
    }

    #[test]
    fn adaptive_in_band_reuses_estimate_and_adds_margin() {
        let config = config_64mhz();
        let mut estimate = 50_000;

        let first = AdaptiveBudget.next_budget(&config, 16, &mut estimate);
        assert_eq!(first.per_slice, 50_000);
        assert_eq!(first.leftover, config.autoadjust_margin);
        assert_eq!(estimate, 51_000);

        let second = AdaptiveBudget.next_budget(&config, 17, &mut estimate);
        assert_eq!(second.per_slice, 51_000);
        assert_eq!(estimate, 52_000);
    }

    #[test]
    fn adaptive_slow_host_rescales_to_nominal_tick() {
        let config = config_64mhz();
        let mut estimate = 60_000;

        let budget = AdaptiveBudget.next_budget(&config, 24, &mut estimate);

        // 60_000 cycles per slice over a nominal 16.67 ms tick, spread across 24 slices.
        assert_eq!(budget.per_slice, 41_666);
        assert_eq!(budget.leftover, config.autoadjust_margin);
        assert_eq!(estimate, 42_666);
    }

    #[test]
    fn adaptive_fast_host_falls_back_to_fixed_split() {
        let config = config_64mhz();
        let mut estimate = 7;

        let budget = AdaptiveBudget.next_budget(&config, 10, &mut estimate);

        assert_eq!(budget.per_slice, 106_666);
        assert_eq!(budget.leftover, 6 + config.autoadjust_margin);
        assert_eq!(estimate, 106_666 + 6 + config.autoadjust_margin);
    }

    #[test]
    fn adaptive_estimate_settles_into_input_period() {
        let config = config_64mhz();
        let mut estimate = 1;
        let mut history = Vec::new();

        for tick in 0..40 {
            let elapsed = if tick % 2 == 0 { 20 } else { 13 };
            let budget = AdaptiveBudget.next_budget(&config, elapsed, &mut estimate);
            assert!(budget.per_slice > 0);
            history.push(estimate);
        }

        for window in history[2..].windows(3) {
            assert_eq!(window[0], window[2], "estimate drifted: {history:?}");
        }
        let (low, high) = (history[2].min(history[3]), history[2].max(history[3]));
        let nominal = config.cycles_per_tick() / 16;
        assert!(low > nominal / 2 && high < nominal * 2);
    }

    #[test]
    fn policies_report_uptime_source() {
        assert_eq!(FixedBudget.uptime_source(), UptimeSource::Counted);
        assert_eq!(AdaptiveBudget.uptime_source(), UptimeSource::HostClock);
    }

    #[test]
    fn scheduler_tracks_tick_boundaries() {
        let mut scheduler = TimingScheduler::for_mode(BudgetMode::Fixed, 100);
        assert_eq!(scheduler.begin_tick(117), 17);
        scheduler.end_tick(120);
        assert_eq!(scheduler.begin_tick(110), 0);

        let state = scheduler.state();
        assert_eq!(state.tick_start, 110);
        assert_eq!(state.tick_end, 120);
        assert_eq!(state.tick_count, 1);
    }

    #[test]
    fn slice_budget_of_single_slice_includes_leftover() {
        let budget = TickBudget {
            per_slice: 5,
            leftover: 3,
            slices: 1,
        };
        assert_eq!(budget.slice_budget(0), 8);
        assert_eq!(budget.total(), 8);
    }

    proptest! {
        #[test]
        fn split_accounts_for_every_cycle(cycles in 1u32..=u32::MAX, elapsed in 0u32..100_000) {
            let (base, leftover) = split_tick(cycles, elapsed);
            prop_assert_eq!(u64::from(base) * u64::from(elapsed.max(1)) + u64::from(leftover), u64::from(cycles));
            prop_assert!(leftover < elapsed.max(1));
        }

        #[test]
        fn budgets_are_always_positive(
            elapsed in 0u64..100_000,
            adaptive in any::<bool>(),
            warmup in proptest::collection::vec(0u64..200, 0..16),
        ) {
            let config = SessionConfig::default();
            let mode = if adaptive { BudgetMode::Adaptive } else { BudgetMode::Fixed };
            let mut scheduler = TimingScheduler::for_mode(mode, 0);
            for step in warmup {
                let budget = scheduler.next_budget(&config, step);
                prop_assert!(budget.per_slice > 0);
            }
            let budget = scheduler.next_budget(&config, elapsed);
            prop_assert!(budget.per_slice > 0);
            prop_assert!(budget.slices > 0);
            prop_assert!(scheduler.state().cycles_per_tick_estimate > 0);
        }
    }
}
