use std::collections::BTreeMap;

use omm_types::ChannelId;
use omm_types::ServiceEntry;

/// A channel's service entry plus whether it was merged into the aggregated service
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntry {
    pub entry: ServiceEntry,
    /// False when the entry's shape disagrees with the aggregated service of the same name
    pub candidate: bool,
}

/// Decoded view of the services advertised by one channel
#[derive(Debug, Clone)]
pub struct ServiceDirectory {
    channel: ChannelId,
    services: BTreeMap<u16, SourceEntry>,
}

impl ServiceDirectory {
    pub fn new(channel: ChannelId) -> Self {
        Self { channel, services: BTreeMap::new() }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn get(&self, service_id: u16) -> Option<&SourceEntry> {
        self.services.get(&service_id)
    }

    pub(crate) fn get_mut(&mut self, service_id: u16) -> Option<&mut SourceEntry> {
        self.services.get_mut(&service_id)
    }

    pub fn by_name(&self, name: &str) -> Option<&SourceEntry> {
        self.services.values().find(|source| source.entry.name() == name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &SourceEntry> {
        self.services.values()
    }

    pub fn service_ids(&self) -> Vec<u16> {
        self.services.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub(crate) fn insert(&mut self, source: SourceEntry) {
        self.services.insert(source.entry.service_id, source);
    }

    pub(crate) fn remove(&mut self, service_id: u16) -> Option<SourceEntry> {
        self.services.remove(&service_id)
    }
}
