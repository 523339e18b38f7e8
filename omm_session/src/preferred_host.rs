use std::collections::BTreeSet;
use std::time::Duration;

use omm_types::ChannelId;
use tracing::info;

use crate::channel::ChannelSession;
use crate::channel::ChannelState;

/// Channels to bring up and channels to park for one fallback step
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FallbackPlan {
    pub connect: Vec<ChannelId>,
    pub park: Vec<ChannelId>,
}

/// Moves traffic back onto the operator's preferred channels
#[derive(Debug, Default)]
pub struct PreferredHostController {
    preferred: BTreeSet<ChannelId>,
    interval: Option<Duration>,
    /// Waiting for a preferred channel to become active before parking the others
    pending: bool,
}

impl PreferredHostController {
    pub fn new(preferred: impl IntoIterator<Item = ChannelId>, interval: Option<Duration>) -> Self {
        Self { preferred: preferred.into_iter().collect(), interval, pending: false }
    }

    pub fn is_configured(&self) -> bool {
        !self.preferred.is_empty()
    }

    pub fn is_preferred(&self, channel: ChannelId) -> bool {
        self.preferred.contains(&channel)
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// One fallback step: bring closed preferred channels back, park the rest once a preferred one is active
    pub fn plan(&mut self, channels: &[ChannelSession]) -> FallbackPlan {
        let mut plan = FallbackPlan::default();
        if !self.is_configured() {
            return plan;
        }

        plan.connect = channels.iter().filter(|channel| self.is_preferred(channel.id) && channel.state() == ChannelState::Closed).map(|channel| channel.id).collect();

        let preferred_active = channels.iter().any(|channel| self.is_preferred(channel.id) && channel.is_active());
        if !preferred_active {
            self.pending = true;
            info!(connecting = plan.connect.len(), "Preferred host fallback waits for a preferred channel");
            return plan;
        }

        self.pending = false;
        plan.park = channels
            .iter()
            .filter(|channel| !self.is_preferred(channel.id) && !channel.parked && channel.state() != ChannelState::Closed)
            .map(|channel| channel.id)
            .collect();
        info!(parking = plan.park.len(), "Preferred host fallback");
        plan
    }

    /// Completes a deferred fallback once a preferred channel is active
    pub fn on_channel_active(&mut self, channel: ChannelId, channels: &[ChannelSession]) -> FallbackPlan {
        if self.pending && self.is_preferred(channel) {
            return self.plan(channels);
        }
        FallbackPlan::default()
    }

    /// Parked channels to bring back because every preferred channel is lost
    pub fn revive(&self, channels: &[ChannelSession]) -> Vec<ChannelId> {
        if !self.is_configured() {
            return Vec::new();
        }
        let all_lost = channels.iter().filter(|channel| self.is_preferred(channel.id)).all(|channel| !channel.state().is_live());
        if !all_lost {
            return Vec::new();
        }
        channels.iter().filter(|channel| channel.parked).map(|channel| channel.id).collect()
    }
}
