use crossbeam_channel::Sender;

use crate::channel::ChannelConfig;
use crate::errors::Result;
use crate::ids::ChannelId;
use crate::msg::Msg;

/// Lifecycle or data event raised by a channel's reader context
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Connection established, ready for login
    Up,
    /// Connection lost or could not be established
    Down { reason: String },
    Message(Msg),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub channel: ChannelId,
    pub event: ChannelEvent,
}

impl TransportEvent {
    pub fn up(channel: ChannelId) -> Self {
        Self { channel, event: ChannelEvent::Up }
    }

    pub fn down(channel: ChannelId, reason: impl Into<String>) -> Self {
        Self { channel, event: ChannelEvent::Down { reason: reason.into() } }
    }

    pub fn message(channel: ChannelId, msg: Msg) -> Self {
        Self { channel, event: ChannelEvent::Message(msg) }
    }
}

pub type TransportEventSender = Sender<TransportEvent>;

/// Physical connection layer consumed by the session
///
/// Implementations deliver inbound traffic by pushing [`TransportEvent`]s onto the
/// sender given to [`Transport::attach`]; events of one channel must keep arrival order.
pub trait Transport: Send {
    /// Hands the transport the queue feeding the dispatcher
    fn attach(&mut self, events: TransportEventSender);

    /// Starts connecting; completion is reported asynchronously as `ChannelEvent::Up` or `Down`
    fn connect(&mut self, channel: ChannelId, config: &ChannelConfig) -> Result<()>;

    fn send(&mut self, channel: ChannelId, msg: Msg) -> Result<()>;

    fn close(&mut self, channel: ChannelId);
}
