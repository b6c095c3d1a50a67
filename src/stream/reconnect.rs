use std::time::Duration;

/// Bounded linear backoff: attempt `n` waits `base_delay * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Determine if another attempt is allowed after `attempts_made` consecutive ones
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before the 1-based `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Open,
    ReconnectScheduled { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Intentional,
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Connection state machine. Transitions come only from transport callbacks
/// and the intentional-close flag, so it runs without any network or timer.
#[derive(Debug, Clone)]
pub struct Link {
    state: LinkState,
    attempts: u32,
    intentional_close: bool,
    policy: ReconnectPolicy,
}

impl Link {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: LinkState::Disconnected,
            attempts: 0,
            intentional_close: false,
            policy,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    /// Caller-initiated connect. Clears any previous retry budget.
    pub fn begin_connect(&mut self) {
        self.intentional_close = false;
        self.attempts = 0;
        self.state = LinkState::Connecting;
    }

    /// The retry waiting to be dialled. The state stays `ReconnectScheduled`
    /// until the dial resolves through `on_open` or `on_close`.
    pub fn scheduled_attempt(&self) -> Option<u32> {
        match self.state {
            LinkState::ReconnectScheduled { attempt } => Some(attempt),
            _ => None,
        }
    }

    pub fn on_open(&mut self) {
        self.attempts = 0;
        self.state = LinkState::Open;
    }

    /// A caller-initiated connect failed. Never retried.
    pub fn on_connect_failed(&mut self) {
        self.state = LinkState::Disconnected;
    }

    /// The transport closed or errored, or a reconnect attempt failed.
    pub fn on_close(&mut self) -> CloseOutcome {
        if self.intentional_close {
            self.state = LinkState::Disconnected;
            return CloseOutcome::Intentional;
        }

        if self.policy.should_retry(self.attempts) {
            self.attempts += 1;
            self.state = LinkState::ReconnectScheduled {
                attempt: self.attempts,
            };
            CloseOutcome::Retry {
                attempt: self.attempts,
                delay: self.policy.delay_for(self.attempts),
            }
        } else {
            self.state = LinkState::Disconnected;
            CloseOutcome::Exhausted {
                attempts: self.attempts,
            }
        }
    }

    pub fn close_intentionally(&mut self) {
        self.intentional_close = true;
        self.state = LinkState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_link() -> Link {
        Link::new(ReconnectPolicy::new(3, Duration::from_millis(500)))
    }

    #[test]
    fn test_should_retry() {
        let policy = ReconnectPolicy::default();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_delay_grows_linearly() {
        let policy = ReconnectPolicy::new(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1500));
    }

    #[test]
    fn test_exhausted_after_four_closes() {
        let mut link = create_test_link();
        link.begin_connect();
        link.on_open();

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            outcomes.push(link.on_close());
        }

        assert_eq!(
            outcomes,
            vec![
                CloseOutcome::Retry { attempt: 1, delay: Duration::from_millis(500) },
                CloseOutcome::Retry { attempt: 2, delay: Duration::from_millis(1000) },
                CloseOutcome::Retry { attempt: 3, delay: Duration::from_millis(1500) },
                CloseOutcome::Exhausted { attempts: 3 },
            ]
        );
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(link.scheduled_attempt(), None);
    }

    #[test]
    fn test_successful_open_resets_attempts() {
        let mut link = create_test_link();
        link.begin_connect();
        link.on_open();

        assert!(matches!(link.on_close(), CloseOutcome::Retry { attempt: 1, .. }));
        assert_eq!(link.scheduled_attempt(), Some(1));
        assert!(matches!(link.on_close(), CloseOutcome::Retry { attempt: 2, .. }));
        assert_eq!(link.scheduled_attempt(), Some(2));
        link.on_open();
        assert_eq!(link.attempts(), 0);

        assert!(matches!(link.on_close(), CloseOutcome::Retry { attempt: 1, .. }));
    }

    #[test]
    fn test_intentional_close_suppresses_retry() {
        let mut link = create_test_link();
        link.begin_connect();
        link.on_open();
        link.close_intentionally();

        assert_eq!(link.on_close(), CloseOutcome::Intentional);
        assert_eq!(link.state(), LinkState::Disconnected);

        // A fresh connect re-arms reconnection
        link.begin_connect();
        link.on_open();
        assert!(matches!(link.on_close(), CloseOutcome::Retry { attempt: 1, .. }));
    }

    #[test]
    fn test_scheduled_attempt_survives_until_resolved() {
        let mut link = create_test_link();
        link.begin_connect();
        link.on_open();
        link.on_close();

        // Reading the pending attempt twice does not consume it
        assert_eq!(link.scheduled_attempt(), Some(1));
        assert_eq!(link.scheduled_attempt(), Some(1));
        assert_eq!(link.state(), LinkState::ReconnectScheduled { attempt: 1 });

        link.on_open();
        assert_eq!(link.scheduled_attempt(), None);
        assert!(link.is_open());
    }

    #[test]
    fn test_failed_connect_is_not_retried() {
        let mut link = create_test_link();
        link.begin_connect();
        link.on_connect_failed();

        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(link.attempts(), 0);
        assert_eq!(link.scheduled_attempt(), None);
    }
}
