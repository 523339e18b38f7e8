use std::collections::BTreeSet;
use std::time::Duration;

use omm_types::ChannelConfig;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::Result;
use crate::errors::SessionError;

/// Who drives the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// A session-owned thread dispatches continuously
    #[default]
    Api,
    /// The application calls `OmmConsumer::dispatch`
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmStandbyMode {
    /// Roles are signalled per channel on the login stream
    #[default]
    LoginBased,
    /// Roles are signalled per service
    ServiceBased,
}

/// Channels coupled into one active/standby unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmStandbyChannelConfig {
    pub name: String,
    #[serde(default)]
    pub mode: WarmStandbyMode,
    /// Channel starting out as the active member
    pub active: String,
    #[serde(default)]
    pub standby: Vec<String>,
}

impl WarmStandbyChannelConfig {
    pub fn new(name: impl Into<String>, active: impl Into<String>, standby: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { name: name.into(), mode: WarmStandbyMode::LoginBased, active: active.into(), standby: standby.into_iter().map(Into::into).collect() }
    }

    pub fn with_mode(mut self, mode: WarmStandbyMode) -> Self {
        self.mode = mode;
        self
    }

    /// Active member first, then standbys in configured order
    pub fn members(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.active.as_str()).chain(self.standby.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceListConfig {
    pub name: String,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredHostConfig {
    #[serde(default)]
    pub channels: Vec<String>,
    /// Warm standby group whose members are all preferred
    #[serde(default)]
    pub group: Option<String>,
    /// Periodic fallback check, disabled when unset
    #[serde(default)]
    pub detection_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reconnect attempts before giving up, -1 for unlimited
    pub attempt_limit: i32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { attempt_limit: -1, min_delay_ms: 1000, max_delay_ms: 5000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub name: String,
    pub user_name: String,
    pub channels: Vec<ChannelConfig>,
    pub warm_standby_groups: Vec<WarmStandbyChannelConfig>,
    pub service_lists: Vec<ServiceListConfig>,
    pub preferred_host: Option<PreferredHostConfig>,
    /// Item request timeout, 0 disables it
    pub request_timeout_ms: u64,
    pub login_request_timeout_ms: u64,
    pub reconnect: ReconnectConfig,
    pub download_dictionary: bool,
    pub dispatch: DispatchMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "Consumer_1".to_string(),
            user_name: "user".to_string(),
            channels: Vec::new(),
            warm_standby_groups: Vec::new(),
            service_lists: Vec::new(),
            preferred_host: None,
            request_timeout_ms: 15_000,
            login_request_timeout_ms: 45_000,
            reconnect: ReconnectConfig::default(),
            download_dictionary: false,
            dispatch: DispatchMode::Api,
        }
    }
}

impl SessionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_warm_standby(mut self, group: WarmStandbyChannelConfig) -> Self {
        self.warm_standby_groups.push(group);
        self
    }

    pub fn with_service_list<I, S>(mut self, name: impl Into<String>, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.service_lists.push(ServiceListConfig { name: name.into(), services: services.into_iter().map(Into::into).collect() });
        self
    }

    pub fn with_preferred_host(mut self, preferred: PreferredHostConfig) -> Self {
        self.preferred_host = Some(preferred);
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_request_timeout_ms)
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|channel| channel.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(SessionError::InvalidConfig("no channels configured".to_string()));
        }

        let mut names = BTreeSet::new();
        for channel in &self.channels {
            if !names.insert(channel.name.as_str()) {
                return Err(SessionError::InvalidConfig(format!("duplicate channel name '{}'", channel.name)));
            }
        }

        let mut grouped = BTreeSet::new();
        for group in &self.warm_standby_groups {
            if group.active.is_empty() && group.standby.is_empty() {
                return Err(SessionError::InvalidConfig(format!("warm standby group '{}' has no members", group.name)));
            }
            for member in group.members() {
                if !names.contains(member) {
                    return Err(SessionError::InvalidConfig(format!("warm standby group '{}' names unknown channel '{member}'", group.name)));
                }
                if !grouped.insert(member) {
                    return Err(SessionError::InvalidConfig(format!("channel '{member}' belongs to more than one warm standby group")));
                }
            }
        }

        for list in &self.service_lists {
            if list.services.is_empty() {
                return Err(SessionError::InvalidConfig(format!("service list '{}' is empty", list.name)));
            }
        }

        if let Some(preferred) = &self.preferred_host {
            for channel in &preferred.channels {
                if !names.contains(channel.as_str()) {
                    return Err(SessionError::InvalidConfig(format!("preferred host names unknown channel '{channel}'")));
                }
            }
            if let Some(group) = &preferred.group {
                if !self.warm_standby_groups.iter().any(|candidate| &candidate.name == group) {
                    return Err(SessionError::InvalidConfig(format!("preferred host names unknown warm standby group '{group}'")));
                }
            }
        }

        if self.reconnect.min_delay_ms > self.reconnect.max_delay_ms {
            return Err(SessionError::InvalidConfig(format!(
                "reconnect min delay {}ms exceeds max delay {}ms",
                self.reconnect.min_delay_ms, self.reconnect.max_delay_ms
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_channels() -> SessionConfig {
        SessionConfig::new("Consumer_1").with_channel(ChannelConfig::new("A", "host-a", 14002)).with_channel(ChannelConfig::new("B", "host-b", 14002))
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(15)));
        assert_eq!(config.login_timeout(), Duration::from_secs(45));
        assert_eq!(config.reconnect.attempt_limit, -1);
        assert_eq!(config.dispatch, DispatchMode::Api);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_disables() {
        let mut config = two_channels();
        config.request_timeout_ms = 0;
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn test_validate_rejections() {
        assert!(two_channels().validate().is_ok());
        assert!(two_channels().with_channel(ChannelConfig::new("A", "other", 1)).validate().is_err());
        assert!(two_channels().with_warm_standby(WarmStandbyChannelConfig::new("G", "A", ["C"])).validate().is_err());
        assert!(two_channels().with_service_list("SVG1", Vec::<String>::new()).validate().is_err());
        assert!(two_channels()
            .with_preferred_host(PreferredHostConfig { group: Some("NOPE".to_string()), ..Default::default() })
            .validate()
            .is_err());

        let mut config = two_channels();
        config.reconnect.min_delay_ms = 10_000;
        assert!(matches!(config.validate(), Err(SessionError::InvalidConfig(_))));
    }

    #[test]
    fn test_deserialize_toml() {
        let config: SessionConfig = toml::from_str(
            r#"
            name = "Consumer_2"
            request_timeout_ms = 500
            dispatch = "user"

            [[channels]]
            name = "A"
            host = "localhost"
            port = 14002

            [[channels]]
            name = "B"
            host = "localhost"
            port = 14003
            connection_type = "encrypted"

            [[warm_standby_groups]]
            name = "WSB"
            mode = "service_based"
            active = "A"
            standby = ["B"]

            [[service_lists]]
            name = "SVG1"
            services = ["FEED_A", "FEED_B"]

            [reconnect]
            attempt_limit = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.warm_standby_groups[0].mode, WarmStandbyMode::ServiceBased);
        assert_eq!(config.reconnect.attempt_limit, 3);
        assert_eq!(config.reconnect.max_delay_ms, 5000);
        assert_eq!(config.dispatch, DispatchMode::User);
        assert!(config.validate().is_ok());
    }
}
