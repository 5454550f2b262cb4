use std::time::Duration;

/// Ring buffer of recent update durations.
#[derive(Debug, Clone)]
pub struct UpdateTimer {
    history: Vec<Duration>,
    next: usize,
    filled: bool,
}

impl UpdateTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: vec![Duration::ZERO; capacity.max(1)],
            next: 0,
            filled: false,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.next] = dt;
        self.next = (self.next + 1) % self.history.len();
        if self.next == 0 {
            self.filled = true;
        }
    }

    fn samples(&self) -> &[Duration] {
        if self.filled {
            &self.history
        } else {
            &self.history[..self.next]
        }
    }

    pub fn count(&self) -> usize {
        self.samples().len()
    }

    pub fn last(&self) -> Duration {
        if self.count() == 0 {
            return Duration::ZERO;
        }
        let idx = (self.next + self.history.len() - 1) % self.history.len();
        self.history[idx]
    }

    pub fn average(&self) -> Duration {
        let samples = self.samples();
        if samples.is_empty() {
            return Duration::ZERO;
        }
        samples.iter().sum::<Duration>() / samples.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.samples().iter().copied().max().unwrap_or(Duration::ZERO)
    }
}

/// Snapshot of one viewer's tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    /// Positions currently in view.
    pub visible: usize,
    /// Visible positions whose tile has been delivered.
    pub loaded: usize,
    /// Visible positions still waiting for a tile.
    pub waiting: usize,
    /// State changes that recomputed the tile set.
    pub updates: u64,
    pub last_update: Duration,
    pub average_update: Duration,
    pub max_update: Duration,
}
