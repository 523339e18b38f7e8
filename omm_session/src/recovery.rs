use std::time::Duration;

use tracing::info;
use tracing::warn;

use crate::channel::ChannelSession;
use crate::config::ReconnectConfig;

/// What happens to an item whose channel went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRecovery {
    /// Open/Suspect, then re-requested on another candidate channel
    Reroute,
    /// Open/Suspect, re-requested on the same channel once it is back
    RecoverInPlace,
    /// Terminal ClosedRecover/Suspect
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    After(Duration),
    GiveUp,
}

/// Failure classification and reconnection policy
#[derive(Debug, Clone)]
pub struct RecoveryManager {
    config: ReconnectConfig,
}

impl RecoveryManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Delay before reconnect attempt `attempt` (1-based): doubles from the minimum, capped at the maximum
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let delay = self.config.min_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.config.max_delay_ms))
    }

    pub fn will_reconnect(&self, channel: &ChannelSession) -> bool {
        channel.reconnect_allowed && (self.config.attempt_limit < 0 || channel.attempts < self.config.attempt_limit as u32)
    }

    /// Counts the failure and decides whether to try again
    pub fn on_disconnect(&self, channel: &mut ChannelSession) -> ReconnectDecision {
        if !self.will_reconnect(channel) {
            warn!(channel = %channel.id, name = %channel.name(), attempts = channel.attempts, "Giving up on channel");
            return ReconnectDecision::GiveUp;
        }

        channel.attempts += 1;
        let delay = self.backoff(channel.attempts);
        info!(channel = %channel.id, name = %channel.name(), attempt = channel.attempts, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        ReconnectDecision::After(delay)
    }

    pub fn on_active(&self, channel: &mut ChannelSession) {
        channel.attempts = 0;
    }

    /// Items of a lost channel: private streams never move, and cannot outlive a warm standby member
    pub fn classify(private: bool, in_warm_standby: bool, will_reconnect: bool) -> ItemRecovery {
        match (private, in_warm_standby, will_reconnect) {
            (false, _, _) => ItemRecovery::Reroute,
            (true, false, true) => ItemRecovery::RecoverInPlace,
            (true, _, _) => ItemRecovery::Close,
        }
    }
}

#[cfg(test)]
mod tests {
    use omm_types::ChannelConfig;
    use omm_types::ChannelId;
    use proptest::prelude::*;

    use super::*;

    fn channel() -> ChannelSession {
        ChannelSession::new(ChannelId(0), ChannelConfig::new("A", "localhost", 14002))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let recovery = RecoveryManager::new(ReconnectConfig { attempt_limit: -1, min_delay_ms: 1000, max_delay_ms: 5000 });
        assert_eq!(recovery.backoff(1), Duration::from_millis(1000));
        assert_eq!(recovery.backoff(2), Duration::from_millis(2000));
        assert_eq!(recovery.backoff(3), Duration::from_millis(4000));
        assert_eq!(recovery.backoff(4), Duration::from_millis(5000));
        assert_eq!(recovery.backoff(60), Duration::from_millis(5000));
    }

    #[test]
    fn test_attempt_limit() {
        let recovery = RecoveryManager::new(ReconnectConfig { attempt_limit: 2, min_delay_ms: 100, max_delay_ms: 1000 });
        let mut channel = channel();

        assert_eq!(recovery.on_disconnect(&mut channel), ReconnectDecision::After(Duration::from_millis(100)));
        assert_eq!(recovery.on_disconnect(&mut channel), ReconnectDecision::After(Duration::from_millis(200)));
        assert_eq!(recovery.on_disconnect(&mut channel), ReconnectDecision::GiveUp);

        recovery.on_active(&mut channel);
        assert!(recovery.will_reconnect(&channel));
        channel.reconnect_allowed = false;
        assert_eq!(recovery.on_disconnect(&mut channel), ReconnectDecision::GiveUp);
    }

    #[test]
    fn test_classify() {
        assert_eq!(RecoveryManager::classify(false, true, false), ItemRecovery::Reroute);
        assert_eq!(RecoveryManager::classify(true, false, true), ItemRecovery::RecoverInPlace);
        assert_eq!(RecoveryManager::classify(true, true, true), ItemRecovery::Close);
        assert_eq!(RecoveryManager::classify(true, false, false), ItemRecovery::Close);
    }

    proptest! {
        #[test]
        fn prop_backoff_bounded_and_monotonic(min in 1u64..10_000, extra in 0u64..100_000, attempt in 1u32..100) {
            let recovery = RecoveryManager::new(ReconnectConfig { attempt_limit: -1, min_delay_ms: min, max_delay_ms: min + extra });
            let delay = recovery.backoff(attempt);
            prop_assert!(delay >= Duration::from_millis(min));
            prop_assert!(delay <= Duration::from_millis(min + extra));
            prop_assert!(recovery.backoff(attempt + 1) >= delay);
        }
    }
}
