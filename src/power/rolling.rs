use std::collections::VecDeque;

/// Roughly 3 seconds of readings at the ~4 Hz most power meters notify at
pub const POWER_WINDOW_CAPACITY: usize = 12;

/// Trailing window of raw power readings with a running arithmetic mean.
#[derive(Debug, Clone, Default)]
pub struct RollingPowerWindow {
    readings: VecDeque<u16>,
    average: Option<f64>,
}

impl RollingPowerWindow {
    pub fn new() -> Self {
        Self {
            readings: VecDeque::with_capacity(POWER_WINDOW_CAPACITY + 1),
            average: None,
        }
    }

    /// Adds a reading, evicting the oldest past capacity, and returns the new average.
    pub fn push(&mut self, watts: u16) -> f64 {
        self.readings.push_back(watts);
        if self.readings.len() > POWER_WINDOW_CAPACITY {
            self.readings.pop_front();
        }
        let sum: f64 = self.readings.iter().copied().map(f64::from).sum();
        let average = sum / self.readings.len() as f64;
        self.average = Some(average);
        average
    }

    /// `None` while empty
    pub fn average(&self) -> Option<f64> {
        self.average
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn clear(&mut self) {
        self.readings.clear();
        self.average = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_last_twelve() {
        let mut window = RollingPowerWindow::new();
        for watts in 1..=15 {
            window.push(watts);
        }
        assert_eq!(window.len(), POWER_WINDOW_CAPACITY);
        // 4..=15
        assert_eq!(window.average(), Some(9.5));
    }

    #[test]
    fn average_while_filling() {
        let mut window = RollingPowerWindow::new();
        assert_eq!(window.average(), None);
        assert_eq!(window.push(100), 100.0);
        assert_eq!(window.push(200), 150.0);
        assert_eq!(window.push(0), 100.0);
    }

    #[test]
    fn clear_empties_average() {
        let mut window = RollingPowerWindow::new();
        window.push(250);
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.average(), None);
    }
}
