use std::time::Duration;

use omm_types::ChannelId;
use omm_types::Handle;
use omm_types::Msg;

use crate::timer::TimerKind;

/// Side effects produced while handling one event, applied by the dispatcher afterwards
#[derive(Debug, Default)]
pub struct Outbox {
    pub sends: Vec<(ChannelId, Msg)>,
    pub deliveries: Vec<(Handle, Msg)>,
    pub timers: Vec<(Duration, TimerKind)>,
    /// Handles whose stream reached a terminal state
    pub closed: Vec<Handle>,
}

impl Outbox {
    pub fn send(&mut self, channel: ChannelId, msg: Msg) {
        self.sends.push((channel, msg));
    }

    pub fn deliver(&mut self, handle: Handle, msg: Msg) {
        self.deliveries.push((handle, msg));
    }

    pub fn schedule(&mut self, after: Duration, kind: TimerKind) {
        self.timers.push((after, kind));
    }

    pub fn close_handle(&mut self, handle: Handle) {
        self.closed.push(handle);
    }

    pub fn is_empty(&self) -> bool {
        self.sends.is_empty() && self.deliveries.is_empty() && self.timers.is_empty() && self.closed.is_empty()
    }
}
