use std::time::Duration;

/// Délai de relance doublé : base, 2×base, 4×base … plafonné à `max`. Seul
/// [`Backoff::reset`] le fait redescendre.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self { base, max, next: base }
    }

    /// Délai à attendre avant la prochaine tentative.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.base;
    }
}
