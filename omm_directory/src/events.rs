use omm_types::ChannelId;
use omm_types::GroupStatus;
use omm_types::ServiceStatus;

/// Change in the aggregated directory
///
/// Only service add/delete/state transitions are shown to the application; the source-level
/// events drive routing and recovery.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryEvent {
    ServiceAdded { service_id: u16, name: String },
    ServiceDeleted { service_id: u16, name: String },
    /// Aggregated state or accepting-requests flag changed
    ServiceStateChanged { service_id: u16, name: String, status: ServiceStatus },
    /// A channel became a routing candidate for the service
    SourceAdded { service_id: u16, channel: ChannelId },
    /// A channel stopped being a routing candidate for the service
    SourceRemoved { service_id: u16, channel: ChannelId },
    SourceStatusChanged { service_id: u16, channel: ChannelId, old: ServiceStatus, new: ServiceStatus },
    GroupStatus { service_id: u16, channel: ChannelId, group: GroupStatus },
}

impl DirectoryEvent {
    pub fn is_application_visible(&self) -> bool {
        matches!(
            self,
            DirectoryEvent::ServiceAdded { .. } | DirectoryEvent::ServiceDeleted { .. } | DirectoryEvent::ServiceStateChanged { .. }
        )
    }

    pub fn service_id(&self) -> u16 {
        match self {
            DirectoryEvent::ServiceAdded { service_id, .. }
            | DirectoryEvent::ServiceDeleted { service_id, .. }
            | DirectoryEvent::ServiceStateChanged { service_id, .. }
            | DirectoryEvent::SourceAdded { service_id, .. }
            | DirectoryEvent::SourceRemoved { service_id, .. }
            | DirectoryEvent::SourceStatusChanged { service_id, .. }
            | DirectoryEvent::GroupStatus { service_id, .. } => *service_id,
        }
    }
}
