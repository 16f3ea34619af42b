//! Trailing-timer coalescing with a liveness floor.
//!
//! Repeated triggers collapse behind a short trailing timer, but an action that has not run
//! for `LIVENESS_FLOOR_MS` runs immediately, so a sustained flood cannot starve it.

/// Trailing window for coalescing bursts.
pub const DEBOUNCE_WINDOW_MS: u32 = 50;
/// Longest an action may go without running while triggers keep arriving.
pub const LIVENESS_FLOOR_MS: f64 = 400.0;

/// What the caller should do with a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Cancel any pending timer and run now.
    RunNow,
    /// Cancel any pending timer and (re)arm one for `delay_ms`.
    Schedule { delay_ms: u32 },
}

/// Coalescing state for one logical action.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window_ms: u32,
    floor_ms: f64,
    last_run: Option<f64>,
    pending: bool,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl Debouncer {
    pub fn new() -> Self {
        Self::with_timing(DEBOUNCE_WINDOW_MS, LIVENESS_FLOOR_MS)
    }

    pub fn with_timing(window_ms: u32, floor_ms: f64) -> Self {
        Self {
            window_ms,
            floor_ms,
            last_run: None,
            pending: false,
        }
    }

    /// Record a trigger at `now_ms`.
    pub fn trigger(&mut self, now_ms: f64) -> PollDecision {
        let overdue = match self.last_run {
            None => true,
            Some(last) => now_ms - last >= self.floor_ms,
        };
        if overdue {
            self.last_run = Some(now_ms);
            self.pending = false;
            PollDecision::RunNow
        } else {
            self.pending = true;
            PollDecision::Schedule {
                delay_ms: self.window_ms,
            }
        }
    }

    /// The trailing timer fired. Returns whether the action should run.
    pub fn fire(&mut self, now_ms: f64) -> bool {
        if !self.pending {
            return false;
        }
        self.pending = false;
        self.last_run = Some(now_ms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_trigger_runs_now() {
        let mut d = Debouncer::new();
        assert_eq!(d.trigger(1000.0), PollDecision::RunNow);
        assert_eq!(d.trigger(1010.0), PollDecision::Schedule { delay_ms: 50 });
        assert!(d.fire(1060.0));
        assert!(!d.fire(1061.0));
    }

    #[test]
    fn test_flood_liveness() {
        let mut d = Debouncer::new();
        let mut runs = Vec::new();
        let mut timer_due: Option<f64> = None;

        let start = 1000.0;
        let mut last_trigger = start;
        for i in 0..500 {
            let now = start + f64::from(i) * 10.0;
            if let Some(due) = timer_due {
                if due <= now {
                    timer_due = None;
                    if d.fire(due) {
                        runs.push(due);
                    }
                }
            }
            match d.trigger(now) {
                PollDecision::RunNow => {
                    timer_due = None;
                    runs.push(now);
                }
                PollDecision::Schedule { delay_ms } => timer_due = Some(now + f64::from(delay_ms)),
            }
            last_trigger = now;
        }
        if let Some(due) = timer_due {
            if d.fire(due) {
                runs.push(due);
            }
        }

        for pair in runs.windows(2) {
            assert!(pair[1] - pair[0] <= LIVENESS_FLOOR_MS, "gap {:?}", pair);
        }
        assert_eq!(runs.iter().filter(|&&t| t > last_trigger).count(), 1);
        // A flood this long collapses to roughly one run per floor interval.
        assert!(runs.len() < 20);
    }
}
