use std::collections::BTreeMap;

use omm_types::ChannelId;
use omm_types::StandbyRole;
use omm_types::StandbySignal;
use tracing::debug;
use tracing::info;

use crate::config::WarmStandbyMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmStandbyMember {
    pub channel: ChannelId,
    pub role: StandbyRole,
    /// Per-service roles for the service-based mode
    pub per_service: BTreeMap<String, StandbyRole>,
}

/// A member took over as active, for the whole channel or one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub channel: ChannelId,
    pub service: Option<String>,
}

/// Channels sharing one logical identity, one of them serving at a time
#[derive(Debug, Clone)]
pub struct WarmStandbyGroup {
    pub name: String,
    pub mode: WarmStandbyMode,
    pub members: Vec<WarmStandbyMember>,
}

impl WarmStandbyGroup {
    pub fn new(name: impl Into<String>, mode: WarmStandbyMode, members: impl IntoIterator<Item = (ChannelId, StandbyRole)>) -> Self {
        let members =
            members.into_iter().map(|(channel, role)| WarmStandbyMember { channel, role, per_service: BTreeMap::new() }).collect();
        Self { name: name.into(), mode, members }
    }

    pub fn contains(&self, channel: ChannelId) -> bool {
        self.members.iter().any(|member| member.channel == channel)
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.members.iter().map(|member| member.channel).collect()
    }

    pub fn role_of(&self, channel: ChannelId, service: Option<&str>) -> Option<StandbyRole> {
        let member = self.members.iter().find(|member| member.channel == channel)?;
        let per_service = service.and_then(|service| member.per_service.get(service)).copied();
        Some(per_service.unwrap_or(member.role))
    }

    /// Applies a provider signal; returns the promotion when a member became active
    pub fn apply_signal(&mut self, channel: ChannelId, signal: &StandbySignal) -> Option<Promotion> {
        if !self.contains(channel) {
            return None;
        }

        let service = match (&signal.service_name, self.mode) {
            (Some(service), WarmStandbyMode::ServiceBased) => Some(service.clone()),
            (Some(service), WarmStandbyMode::LoginBased) => {
                debug!(group = %self.name, %channel, service = %service, "Per-service standby signal ignored in login-based mode");
                return None;
            }
            (None, _) => None,
        };

        let previous = self.role_of(channel, service.as_deref());
        for member in &mut self.members {
            let role = if member.channel == channel {
                signal.role
            } else if signal.role == StandbyRole::Active {
                StandbyRole::Standby
            } else {
                continue;
            };
            match &service {
                Some(service) => {
                    member.per_service.insert(service.clone(), role);
                }
                None => {
                    member.role = role;
                    member.per_service.clear();
                }
            }
        }

        info!(group = %self.name, %channel, service = ?service, role = ?signal.role, "Warm standby role signalled");
        (signal.role == StandbyRole::Active && previous != Some(StandbyRole::Active)).then_some(Promotion { channel, service })
    }

    /// A member that lost its connection comes back as standby unless the provider says otherwise
    pub fn reset_member(&mut self, channel: ChannelId) {
        if let Some(member) = self.members.iter_mut().find(|member| member.channel == channel) {
            member.role = StandbyRole::Standby;
            member.per_service.clear();
        }
    }

    /// The member that should carry new requests for `service`
    ///
    /// The first usable member holding the active role wins; with none, the first usable
    /// member in configured order stands in until the provider promotes one.
    pub fn serving_member(&self, service: &str, usable: impl Fn(ChannelId) -> bool) -> Option<ChannelId> {
        let mut fallback = None;
        for member in &self.members {
            if !usable(member.channel) {
                continue;
            }
            if self.role_of(member.channel, Some(service)) == Some(StandbyRole::Active) {
                return Some(member.channel);
            }
            fallback.get_or_insert(member.channel);
        }
        fallback
    }
}
