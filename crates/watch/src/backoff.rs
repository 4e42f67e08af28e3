//! Reconnect delay after a failed stream.

use std::time::Duration;

/// Exponential delay policy applied only after stream faults.
///
/// A clean stream end reconnects immediately regardless of this policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub enabled: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            enabled: true,
        }
    }
}

impl Backoff {
    /// Reconnect straight away after faults too.
    pub fn none() -> Self {
        Self { enabled: false, ..Default::default() }
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Default policy with the cap from `STACKSPARK_WATCH_BACKOFF_MAX_SECS` (0 disables).
    pub fn from_env() -> Self {
        match std::env::var("STACKSPARK_WATCH_BACKOFF_MAX_SECS").ok().and_then(|s| s.parse::<u64>().ok()) {
            Some(0) => Self::none(),
            Some(secs) => Self::default().with_max(Duration::from_secs(secs)),
            None => Self::default(),
        }
    }

    pub(crate) fn state(&self) -> BackoffState {
        BackoffState { policy: self.clone(), next: None }
    }
}

#[derive(Debug)]
pub(crate) struct BackoffState {
    policy: Backoff,
    next: Option<Duration>,
}

impl BackoffState {
    /// Delay before the next reconnect; grows on every call until reset.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.enabled {
            return None;
        }
        let cur = self.next.unwrap_or(self.policy.initial).min(self.policy.max);
        let grown = Duration::from_nanos((cur.as_nanos() as f64 * self.policy.multiplier.max(1.0)) as u64);
        self.next = Some(grown.min(self.policy.max));
        Some(cur)
    }

    pub(crate) fn reset(&mut self) {
        self.next = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_to_cap_and_resets() {
        let mut s = Backoff::default().with_max(Duration::from_millis(500)).state();
        let delays: Vec<_> = (0..5).map(|_| s.next_delay().unwrap().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        s.reset();
        assert_eq!(s.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn disabled_policy_never_waits() {
        let mut s = Backoff::none().state();
        assert_eq!(s.next_delay(), None);
        assert_eq!(s.next_delay(), None);
    }
}
