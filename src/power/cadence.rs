/// Crank event times count in 1/1024ths of a second
const CRANK_EVENT_TICKS_PER_SECOND: f64 = 1024.0;
/// Anything above this is a glitch, not a rider
pub const MAX_PLAUSIBLE_CADENCE_RPM: f64 = 300.0;

/// The crank revolution block of a Cycling Power Measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrankRevolutions {
    pub cumulative_revolutions: u16,
    /// 1/1024 s, rolls over every 64 seconds
    pub last_event_time: u16,
}

/// The previous crank sample, which cadence is derived against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrankCounterState {
    previous: Option<CrankRevolutions>,
}

impl CrankCounterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_cumulative_revolutions(&self) -> Option<u16> {
        self.previous.map(|p| p.cumulative_revolutions)
    }

    pub fn last_event_time(&self) -> Option<u16> {
        self.previous.map(|p| p.last_event_time)
    }

    /// Records `current` as the new previous sample and returns the cadence
    /// between the two, if there was a previous sample and the result is usable.
    pub fn update(&mut self, current: CrankRevolutions) -> Option<f64> {
        let previous = self.previous.replace(current)?;
        cadence_between(previous, current)
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

/// Cadence in RPM between two crank samples.
///
/// Both counters are u16 and may have rolled over between samples.
/// Stationary cranks are exactly 0 RPM. A zero time delta, or a result
/// outside `0..=300` RPM, gives `None`.
pub fn cadence_between(previous: CrankRevolutions, current: CrankRevolutions) -> Option<f64> {
    let rev_diff = current
        .cumulative_revolutions
        .wrapping_sub(previous.cumulative_revolutions);
    let time_diff = current.last_event_time.wrapping_sub(previous.last_event_time);

    if rev_diff == 0 {
        return Some(0.0);
    }
    if time_diff == 0 {
        return None;
    }

    let minutes = f64::from(time_diff) / CRANK_EVENT_TICKS_PER_SECOND / 60.0;
    let rpm = f64::from(rev_diff) / minutes;
    (0.0..=MAX_PLAUSIBLE_CADENCE_RPM).contains(&rpm).then_some(rpm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crank(revs: u16, time: u16) -> CrankRevolutions {
        CrankRevolutions {
            cumulative_revolutions: revs,
            last_event_time: time,
        }
    }

    #[test]
    fn first_sample_only_primes() {
        let mut state = CrankCounterState::new();
        assert_eq!(state.update(crank(10, 1024)), None);
        assert_eq!(state.last_cumulative_revolutions(), Some(10));
        assert_eq!(state.last_event_time(), Some(1024));
    }

    #[test]
    fn ninety_rpm() {
        // 3 revolutions in 2 seconds
        let rpm = cadence_between(crank(100, 0), crank(103, 2048)).unwrap();
        assert!((rpm - 90.0).abs() < 1e-9);
    }

    #[test]
    fn rollover_result_out_of_bounds() {
        // revs 65534 -> 2 is 4 revs, in 100/1024 s, about 2457.6 RPM
        assert_eq!(cadence_between(crank(65534, 1000), crank(2, 1100)), None);
    }

    #[test]
    fn event_time_rollover() {
        // 1 rev across the time wrap, 65000 -> 500 is 1036 ticks
        let rpm = cadence_between(crank(5, 65000), crank(6, 500)).unwrap();
        let expected = 1.0 / (1036.0 / 1024.0 / 60.0);
        assert!((rpm - expected).abs() < 1e-9);
    }

    #[test]
    fn both_counters_roll_over() {
        let rpm = cadence_between(crank(65535, 65024), crank(0, 512)).unwrap();
        // 1 rev in 1024 ticks
        assert!((rpm - 60.0).abs() < 1e-9);
    }

    #[test]
    fn stationary_is_exactly_zero() {
        assert_eq!(cadence_between(crank(40, 1000), crank(40, 3000)), Some(0.0));
        assert_eq!(cadence_between(crank(40, 1000), crank(40, 1000)), Some(0.0));
    }

    #[test]
    fn no_time_elapsed() {
        assert_eq!(cadence_between(crank(40, 1000), crank(41, 1000)), None);
    }

    #[test]
    fn rejected_sample_still_becomes_previous() {
        let mut state = CrankCounterState::new();
        state.update(crank(65534, 1000));
        assert_eq!(state.update(crank(2, 1100)), None);
        assert_eq!(state.last_cumulative_revolutions(), Some(2));
        assert_eq!(state.last_event_time(), Some(1100));

        // 2 revs in 1.5 s
        let rpm = state.update(crank(4, 1100 + 1536)).unwrap();
        assert!((rpm - 80.0).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_both_counters() {
        let mut state = CrankCounterState::new();
        state.update(crank(1, 1));
        state.reset();
        assert_eq!(state.last_cumulative_revolutions(), None);
        assert_eq!(state.last_event_time(), None);
        assert_eq!(state.update(crank(2, 1025)), None);
    }
}
