use omm_types::AckMsg;
use omm_types::DirectoryMsg;
use omm_types::GenericMsg;
use omm_types::Handle;
use omm_types::Msg;
use omm_types::RefreshMsg;
use omm_types::StatusMsg;
use omm_types::UpdateMsg;
use tracing::trace;

/// Context passed along with every callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerEvent {
    pub handle: Handle,
    /// Batch handle the item was opened through
    pub parent: Option<Handle>,
}

/// Application callbacks, invoked on the dispatching thread
///
/// Service ids and names in delivered messages are always the ones the application
/// requested with (aggregated id, service name or service list name).
pub trait ConsumerClient: Send {
    fn on_refresh(&mut self, _msg: &RefreshMsg, _event: &ConsumerEvent) {}

    fn on_update(&mut self, _msg: &UpdateMsg, _event: &ConsumerEvent) {}

    fn on_status(&mut self, _msg: &StatusMsg, _event: &ConsumerEvent) {}

    fn on_ack(&mut self, _msg: &AckMsg, _event: &ConsumerEvent) {}

    fn on_generic(&mut self, _msg: &GenericMsg, _event: &ConsumerEvent) {}

    fn on_directory(&mut self, _msg: &DirectoryMsg, _event: &ConsumerEvent) {}
}

pub(crate) fn dispatch_to(client: &mut dyn ConsumerClient, msg: &Msg, event: &ConsumerEvent) {
    match msg {
        Msg::Refresh(refresh) => client.on_refresh(refresh, event),
        Msg::Update(update) => client.on_update(update, event),
        Msg::Status(status) => client.on_status(status, event),
        Msg::Ack(ack) => client.on_ack(ack, event),
        Msg::Generic(generic) => client.on_generic(generic, event),
        Msg::Directory(directory) => client.on_directory(directory, event),
        Msg::Request(_) | Msg::Post(_) | Msg::Close(_) => trace!(handle = %event.handle, kind = msg.kind(), "Not deliverable"),
    }
}
