use omm_types::ChannelConfig;
use omm_types::ChannelId;
use omm_types::StandbyRole;
use serde::Serialize;
use tracing::info;

/// Connection lifecycle of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChannelState {
    Connecting,
    LoggedIn,
    DirectoryReady,
    Active,
    Reconnecting,
    Closed,
}

impl ChannelState {
    /// Login accepted and not lost since
    pub fn is_logged_in(&self) -> bool {
        matches!(self, ChannelState::LoggedIn | ChannelState::DirectoryReady | ChannelState::Active)
    }

    /// Connection exists or is being established
    pub fn is_live(&self) -> bool {
        !matches!(self, ChannelState::Reconnecting | ChannelState::Closed)
    }
}

/// Snapshot of a channel for the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub channel: ChannelId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub state: ChannelState,
    pub warm_standby_group: Option<String>,
    pub role: Option<StandbyRole>,
    pub preferred: bool,
}

/// One physical connection and its login state
#[derive(Debug)]
pub struct ChannelSession {
    pub id: ChannelId,
    pub config: ChannelConfig,
    state: ChannelState,
    /// Index of the warm standby group the channel belongs to
    pub group: Option<usize>,
    pub preferred: bool,
    /// Closed by a preferred-host fallback, revived only when every preferred channel is lost
    pub parked: bool,
    /// Consecutive failed connection attempts
    pub attempts: u32,
    pub reconnect_allowed: bool,
    pub reconnect_timer: Option<u64>,
}

impl ChannelSession {
    pub fn new(id: ChannelId, config: ChannelConfig) -> Self {
        Self {
            id,
            config,
            state: ChannelState::Connecting,
            group: None,
            preferred: false,
            parked: false,
            attempts: 0,
            reconnect_allowed: true,
            reconnect_timer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ChannelState::Active
    }

    pub fn set_state(&mut self, state: ChannelState) {
        if self.state != state {
            info!(channel = %self.id, name = %self.config.name, from = ?self.state, to = ?state, "Channel state changed");
            self.state = state;
        }
    }

    pub fn info(&self, group: Option<(&str, StandbyRole)>) -> ChannelInfo {
        ChannelInfo {
            channel: self.id,
            name: self.config.name.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            state: self.state,
            warm_standby_group: group.map(|(name, _)| name.to_string()),
            role: group.map(|(_, role)| role),
            preferred: self.preferred,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_helpers() {
        let mut channel = ChannelSession::new(ChannelId(0), ChannelConfig::new("A", "localhost", 14002));
        assert!(channel.state().is_live());
        assert!(!channel.state().is_logged_in());

        channel.set_state(ChannelState::Active);
        assert!(channel.is_active());
        assert!(channel.state().is_logged_in());

        channel.set_state(ChannelState::Reconnecting);
        assert!(!channel.state().is_live());

        let info = channel.info(Some(("WSB", StandbyRole::Standby)));
        assert_eq!(info.warm_standby_group.as_deref(), Some("WSB"));
        assert_eq!(info.role, Some(StandbyRole::Standby));
        assert_eq!(info.port, 14002);
    }
}
