//! Time-window policy.

use tether_types::TimeWindow;

/// Supplies the sync window; consulted at startup and at every refresh
/// instant.
pub trait WindowSupplier: Send {
    fn window(&mut self, now_epoch_seconds: u64) -> TimeWindow;
}

/// Default policy: whole-day-aligned window refreshing at the end of the
/// current UTC day.
pub struct DayAlignedWindow {
    days: u32,
}

impl DayAlignedWindow {
    /// Window spanning `days` UTC days (minimum 2, so the refresh instant
    /// precedes the window end).
    pub fn new(days: u32) -> Self {
        Self { days: days.max(2) }
    }
}

impl Default for DayAlignedWindow {
    fn default() -> Self {
        Self::new(7)
    }
}

impl WindowSupplier for DayAlignedWindow {
    fn window(&mut self, now_epoch_seconds: u64) -> TimeWindow {
        match TimeWindow::whole_days(now_epoch_seconds, self.days) {
            Ok(window) => window,
            // days >= 2 keeps whole_days valid for any instant.
            Err(_) => unreachable!("day-aligned window with days >= 2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_types::SECONDS_PER_DAY;

    #[test]
    fn test_day_aligned_window_shape() {
        let mut supplier = DayAlignedWindow::new(7);
        let now = 1_700_000_000;
        let window = supplier.window(now);

        assert_eq!(window.from(), now - now % SECONDS_PER_DAY);
        assert_eq!(window.refresh(), window.from() + SECONDS_PER_DAY);
        assert_eq!(window.to(), window.from() + 7 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_minimum_span_enforced() {
        let mut supplier = DayAlignedWindow::new(0);
        let window = supplier.window(1_700_000_000);
        assert!(window.refresh() < window.to());
    }

    #[test]
    fn test_next_day_rolls_window_forward() {
        let mut supplier = DayAlignedWindow::new(7);
        let today = supplier.window(1_700_000_000);
        let tomorrow = supplier.window(today.refresh());
        assert_eq!(tomorrow.from(), today.refresh());
    }
}
