use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::domain::DomainType;
use crate::qos::Qos;
use crate::state::OmmState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Down,
    #[default]
    Up,
}

/// Static description of a service as advertised in the source directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<DomainType>,
    #[serde(default)]
    pub qos: Vec<Qos>,
    #[serde(default)]
    pub supports_qos_range: bool,
    #[serde(default)]
    pub item_list: String,
    #[serde(default)]
    pub dictionaries_provided: Vec<String>,
    #[serde(default)]
    pub dictionaries_used: Vec<String>,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: vec![DomainType::MarketPrice],
            qos: Vec::new(),
            supports_qos_range: false,
            item_list: String::new(),
            dictionaries_provided: Vec::new(),
            dictionaries_used: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = DomainType>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn with_qos(mut self, qos: impl IntoIterator<Item = Qos>) -> Self {
        self.qos = qos.into_iter().collect();
        self
    }

    pub fn with_qos_range(mut self, supports_qos_range: bool) -> Self {
        self.supports_qos_range = supports_qos_range;
        self
    }

    pub fn with_item_list(mut self, item_list: impl Into<String>) -> Self {
        self.item_list = item_list.into();
        self
    }

    pub fn with_dictionaries_provided<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dictionaries_provided = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn supports(&self, domain: DomainType) -> bool {
        self.capabilities.contains(&domain)
    }

    /// Two entries with the same name can be merged only if they have the same shape:
    /// capability set, QoS set, QoS range flag and item list name
    pub fn same_shape(&self, other: &ServiceInfo) -> bool {
        if self.supports_qos_range != other.supports_qos_range || self.item_list != other.item_list {
            return false;
        }

        if self.qos.len() != other.qos.len() || !self.qos.iter().all(|qos| other.qos.contains(qos)) {
            return false;
        }

        let mut ours = self.capabilities.clone();
        let mut theirs = other.capabilities.clone();
        ours.sort();
        ours.dedup();
        theirs.sort();
        theirs.dedup();
        ours == theirs
    }
}

/// Dynamic state of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub accepting_requests: bool,
    pub status: Option<OmmState>,
}

impl ServiceStatus {
    pub fn up() -> Self {
        Self { state: ServiceState::Up, accepting_requests: true, status: None }
    }

    pub fn down() -> Self {
        Self { state: ServiceState::Down, accepting_requests: true, status: None }
    }

    pub fn not_accepting() -> Self {
        Self { state: ServiceState::Up, accepting_requests: false, status: None }
    }

    pub fn is_serving(&self) -> bool {
        self.state == ServiceState::Up && self.accepting_requests
    }
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self::up()
    }
}

/// One service as advertised by one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEntry {
    /// Provider-assigned id, only meaningful on the owning channel
    pub service_id: u16,
    pub info: ServiceInfo,
    pub status: ServiceStatus,
    pub group_id: Option<Bytes>,
}

impl ServiceEntry {
    pub fn new(service_id: u16, info: ServiceInfo) -> Self {
        Self { service_id, info, status: ServiceStatus::up(), group_id: None }
    }

    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_serving(&self) -> bool {
        self.status.is_serving()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAction {
    Add,
    Update,
    Delete,
}

/// Status of an item group within a service
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStatus {
    pub group_id: Bytes,
    pub state: Option<OmmState>,
    /// Items of `group_id` now belong to this group
    pub merged_to: Option<Bytes>,
}

/// Incremental change to one service of a channel directory
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceUpdate {
    pub service_id: u16,
    pub action: MapAction,
    pub info: Option<ServiceInfo>,
    pub status: Option<ServiceStatus>,
    pub group_id: Option<Bytes>,
    pub groups: Vec<GroupStatus>,
}

impl ServiceUpdate {
    pub fn add(entry: ServiceEntry) -> Self {
        Self {
            service_id: entry.service_id,
            action: MapAction::Add,
            info: Some(entry.info),
            status: Some(entry.status),
            group_id: entry.group_id,
            groups: Vec::new(),
        }
    }

    pub fn delete(service_id: u16) -> Self {
        Self { service_id, action: MapAction::Delete, info: None, status: None, group_id: None, groups: Vec::new() }
    }

    pub fn status(service_id: u16, status: ServiceStatus) -> Self {
        Self { service_id, action: MapAction::Update, info: None, status: Some(status), group_id: None, groups: Vec::new() }
    }

    pub fn info(service_id: u16, info: ServiceInfo) -> Self {
        Self { service_id, action: MapAction::Update, info: Some(info), status: None, group_id: None, groups: Vec::new() }
    }

    pub fn group(service_id: u16, group: GroupStatus) -> Self {
        Self { service_id, action: MapAction::Update, info: None, status: None, group_id: None, groups: vec![group] }
    }
}
