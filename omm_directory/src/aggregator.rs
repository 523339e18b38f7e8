use std::collections::BTreeMap;

use omm_types::ChannelId;
use omm_types::GroupStatus;
use omm_types::MapAction;
use omm_types::ServiceEntry;
use omm_types::ServiceInfo;
use omm_types::ServiceState;
use omm_types::ServiceStatus;
use omm_types::ServiceUpdate;
use rapidhash::RapidHashMap;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::directory::ServiceDirectory;
use crate::directory::SourceEntry;
use crate::events::DirectoryEvent;
use crate::registry::ServiceIdRegistry;

/// One logical service as seen by the application
#[derive(Debug, Clone)]
pub struct AggregatedService {
    pub service_id: u16,
    pub name: String,
    /// Shape of the founding entry; later sources must match it to be merged
    pub info: ServiceInfo,
    /// Candidate sources: channel -> provider service id on that channel
    sources: BTreeMap<ChannelId, u16>,
    status: ServiceStatus,
}

impl AggregatedService {
    pub fn status(&self) -> &ServiceStatus {
        &self.status
    }

    pub fn is_up(&self) -> bool {
        self.status.state == ServiceState::Up
    }

    /// Candidate channels in ordinal order
    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.sources.keys().copied()
    }

    pub fn provider_service_id(&self, channel: ChannelId) -> Option<u16> {
        self.sources.get(&channel).copied()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn has_source(&self, channel: ChannelId) -> bool {
        self.sources.contains_key(&channel)
    }

    /// Entry as presented to the application, keyed by the logical id
    pub fn to_entry(&self) -> ServiceEntry {
        ServiceEntry::new(self.service_id, self.info.clone()).with_status(self.status.clone())
    }
}

/// Merges per-channel service directories into one table of logical services
#[derive(Debug, Default)]
pub struct DirectoryAggregator {
    registry: ServiceIdRegistry,
    channels: BTreeMap<ChannelId, ServiceDirectory>,
    services: BTreeMap<u16, AggregatedService>,
    by_name: RapidHashMap<String, u16>,
}

impl DirectoryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves logical ids for names ahead of any directory traffic (service-list aliases)
    pub fn reserve_ids<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> Vec<u16> {
        names.into_iter().map(|name| self.registry.id_for(name)).collect()
    }

    pub fn registry(&self) -> &ServiceIdRegistry {
        &self.registry
    }

    pub fn service_by_name(&self, name: &str) -> Option<&AggregatedService> {
        self.by_name.get(name).and_then(|id| self.services.get(id))
    }

    pub fn service_by_id(&self, service_id: u16) -> Option<&AggregatedService> {
        self.services.get(&service_id)
    }

    pub fn services(&self) -> impl Iterator<Item = &AggregatedService> {
        self.services.values()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn channel_directory(&self, channel: ChannelId) -> Option<&ServiceDirectory> {
        self.channels.get(&channel)
    }

    /// The candidate entry a channel contributes to a logical service
    pub fn source_entry(&self, channel: ChannelId, service_id: u16) -> Option<&ServiceEntry> {
        let provider_id = self.services.get(&service_id)?.provider_service_id(channel)?;
        self.channels.get(&channel)?.get(provider_id).map(|source| &source.entry)
    }

    /// Maps a provider service id on `channel` back to the logical id, candidates only
    pub fn logical_id(&self, channel: ChannelId, provider_id: u16) -> Option<u16> {
        let source = self.channels.get(&channel)?.get(provider_id)?;
        if !source.candidate {
            return None;
        }
        self.by_name.get(source.entry.name()).copied()
    }

    /// Aggregated directory in logical id order, as delivered to directory subscribers
    pub fn view(&self) -> Vec<ServiceEntry> {
        self.services.values().map(AggregatedService::to_entry).collect()
    }

    /// Replaces the full service set of `channel`
    pub fn on_directory_refresh(&mut self, channel: ChannelId, entries: Vec<ServiceEntry>) -> Vec<DirectoryEvent> {
        let mut events = Vec::new();
        let directory = self.channels.entry(channel).or_insert_with(|| ServiceDirectory::new(channel));

        let mut incoming: BTreeMap<u16, ServiceEntry> = BTreeMap::new();
        for entry in entries {
            incoming.insert(entry.service_id, entry);
        }

        // Entries that vanished or changed name/shape go first so re-adds see a clean table
        let mut stale = Vec::new();
        for existing in directory.entries() {
            match incoming.get(&existing.entry.service_id) {
                Some(next) if next.info.name == existing.entry.info.name && next.info.same_shape(&existing.entry.info) => {}
                _ => stale.push(existing.entry.service_id),
            }
        }
        for service_id in stale {
            self.remove_entry(channel, service_id, &mut events);
        }

        for (service_id, entry) in incoming {
            let current = self.channels.get(&channel).and_then(|directory| directory.get(service_id)).map(|source| source.entry.clone());
            match current {
                None => self.add_entry(channel, entry, &mut events),
                Some(current) => {
                    if current.info != entry.info {
                        self.apply_info(channel, service_id, entry.info, &mut events);
                    }
                    if current.status != entry.status {
                        self.apply_status(channel, service_id, entry.status, &mut events);
                    }
                    if current.group_id != entry.group_id {
                        if let Some(source) = self.source_mut(channel, service_id) {
                            source.entry.group_id = entry.group_id;
                        }
                    }
                }
            }
        }

        debug!(%channel, events = events.len(), services = self.services.len(), "Directory refresh applied");
        events
    }

    /// Applies incremental add/update/delete actions from `channel`
    pub fn on_directory_update(&mut self, channel: ChannelId, updates: Vec<ServiceUpdate>) -> Vec<DirectoryEvent> {
        let mut events = Vec::new();
        self.channels.entry(channel).or_insert_with(|| ServiceDirectory::new(channel));

        for update in updates {
            let known = self.channels.get(&channel).and_then(|directory| directory.get(update.service_id)).is_some();
            match update.action {
                MapAction::Delete => {
                    if known {
                        self.remove_entry(channel, update.service_id, &mut events);
                    } else {
                        debug!(%channel, service_id = update.service_id, "Delete for unknown service ignored");
                    }
                }
                MapAction::Add if !known => match update.info {
                    Some(info) => {
                        let entry = ServiceEntry { service_id: update.service_id, info, status: update.status.unwrap_or_default(), group_id: update.group_id };
                        self.add_entry(channel, entry, &mut events);
                        self.apply_groups(channel, update.service_id, update.groups, &mut events);
                    }
                    None => warn!(%channel, service_id = update.service_id, "Service add without info ignored"),
                },
                MapAction::Add | MapAction::Update => {
                    if !known {
                        debug!(%channel, service_id = update.service_id, "Update for unknown service ignored");
                        continue;
                    }
                    if let Some(info) = update.info {
                        self.apply_info(channel, update.service_id, info, &mut events);
                    }
                    if let Some(status) = update.status {
                        self.apply_status(channel, update.service_id, status, &mut events);
                    }
                    if let Some(group_id) = update.group_id {
                        if let Some(source) = self.source_mut(channel, update.service_id) {
                            source.entry.group_id = Some(group_id);
                        }
                    }
                    self.apply_groups(channel, update.service_id, update.groups, &mut events);
                }
            }
        }

        events
    }

    /// Removes every entry contributed by `channel`
    pub fn on_channel_lost(&mut self, channel: ChannelId) -> Vec<DirectoryEvent> {
        let mut events = Vec::new();
        let service_ids = match self.channels.get(&channel) {
            Some(directory) => directory.service_ids(),
            None => return events,
        };

        for service_id in service_ids {
            self.remove_entry(channel, service_id, &mut events);
        }
        self.channels.remove(&channel);

        info!(%channel, events = events.len(), services = self.services.len(), "Channel directory dropped");
        events
    }

    fn source_mut(&mut self, channel: ChannelId, service_id: u16) -> Option<&mut SourceEntry> {
        self.channels.get_mut(&channel)?.get_mut(service_id)
    }

    fn add_entry(&mut self, channel: ChannelId, entry: ServiceEntry, events: &mut Vec<DirectoryEvent>) {
        let name = entry.name().to_string();
        let candidate = match self.by_name.get(&name).copied() {
            None => {
                self.found_service(channel, &entry, events);
                true
            }
            Some(logical_id) => self.try_merge(logical_id, channel, &entry, events),
        };

        if let Some(directory) = self.channels.get_mut(&channel) {
            directory.insert(SourceEntry { entry, candidate });
        }
    }

    fn found_service(&mut self, channel: ChannelId, entry: &ServiceEntry, events: &mut Vec<DirectoryEvent>) -> u16 {
        let name = entry.name().to_string();
        let service_id = self.registry.id_for(&name);
        let mut sources = BTreeMap::new();
        sources.insert(channel, entry.service_id);

        let service = AggregatedService { service_id, name: name.clone(), info: entry.info.clone(), sources, status: entry.status.clone() };
        self.services.insert(service_id, service);
        self.by_name.insert(name.clone(), service_id);

        info!(%channel, service = %name, service_id, "Aggregated service added");
        events.push(DirectoryEvent::ServiceAdded { service_id, name });
        events.push(DirectoryEvent::SourceAdded { service_id, channel });
        service_id
    }

    fn try_merge(&mut self, logical_id: u16, channel: ChannelId, entry: &ServiceEntry, events: &mut Vec<DirectoryEvent>) -> bool {
        let Some(service) = self.services.get_mut(&logical_id) else {
            return false;
        };

        if !service.info.same_shape(&entry.info) {
            debug!(%channel, service = %service.name, "Service shape differs from aggregated service, not merged");
            return false;
        }

        service.sources.insert(channel, entry.service_id);
        events.push(DirectoryEvent::SourceAdded { service_id: logical_id, channel });
        // The new source is not in the channel table yet, fold its status in directly
        self.refresh_status(logical_id, Some(&entry.status), events);
        true
    }

    fn remove_entry(&mut self, channel: ChannelId, provider_id: u16, events: &mut Vec<DirectoryEvent>) {
        let Some(source) = self.channels.get_mut(&channel).and_then(|directory| directory.remove(provider_id)) else {
            return;
        };
        if !source.candidate {
            return;
        }

        let name = source.entry.name().to_string();
        let Some(logical_id) = self.by_name.get(&name).copied() else {
            return;
        };

        let remaining = match self.services.get_mut(&logical_id) {
            Some(service) => {
                service.sources.remove(&channel);
                service.sources.len()
            }
            None => return,
        };
        events.push(DirectoryEvent::SourceRemoved { service_id: logical_id, channel });

        if remaining > 0 {
            self.refresh_status(logical_id, None, events);
            return;
        }

        self.services.remove(&logical_id);
        self.by_name.remove(&name);
        info!(%channel, service = %name, service_id = logical_id, "Aggregated service deleted");
        events.push(DirectoryEvent::ServiceDeleted { service_id: logical_id, name: name.clone() });

        self.refound(&name, events);
    }

    /// Promotes a leftover non-candidate entry to found the service again
    fn refound(&mut self, name: &str, events: &mut Vec<DirectoryEvent>) {
        let orphan = self
            .channels
            .iter()
            .find_map(|(channel, directory)| directory.by_name(name).map(|source| (*channel, source.entry.clone())));
        let Some((founder_channel, founder)) = orphan else {
            return;
        };

        let logical_id = self.found_service(founder_channel, &founder, events);
        if let Some(source) = self.source_mut(founder_channel, founder.service_id) {
            source.candidate = true;
        }

        let others: Vec<(ChannelId, ServiceEntry)> = self
            .channels
            .iter()
            .filter(|(channel, _)| **channel != founder_channel)
            .filter_map(|(channel, directory)| directory.by_name(name).map(|source| (*channel, source.entry.clone())))
            .collect();
        for (channel, entry) in others {
            if self.try_merge(logical_id, channel, &entry, events) {
                if let Some(source) = self.source_mut(channel, entry.service_id) {
                    source.candidate = true;
                }
            }
        }
    }

    fn apply_info(&mut self, channel: ChannelId, provider_id: u16, info: ServiceInfo, events: &mut Vec<DirectoryEvent>) {
        let Some(source) = self.channels.get(&channel).and_then(|directory| directory.get(provider_id)).cloned() else {
            return;
        };
        if info.name != source.entry.info.name {
            warn!(%channel, service_id = provider_id, from = %source.entry.info.name, to = %info.name, "Service rename ignored");
            return;
        }

        let Some(logical_id) = self.by_name.get(&info.name).copied() else {
            return;
        };
        let merged_shape = match self.services.get(&logical_id) {
            Some(service) => service.info.clone(),
            None => return,
        };

        if source.candidate {
            if !merged_shape.same_shape(&info) {
                debug!(%channel, service = %info.name, "Shape change on merged source ignored for routing");
                return;
            }
            if let Some(target) = self.source_mut(channel, provider_id) {
                target.entry.info = info;
            }
            return;
        }

        let corrected = merged_shape.same_shape(&info);
        let mut entry = source.entry;
        entry.info = info;
        if let Some(target) = self.source_mut(channel, provider_id) {
            target.entry.info = entry.info.clone();
        }
        if corrected {
            if self.try_merge(logical_id, channel, &entry, events) {
                if let Some(target) = self.source_mut(channel, provider_id) {
                    target.candidate = true;
                }
            }
        }
    }

    fn apply_status(&mut self, channel: ChannelId, provider_id: u16, status: ServiceStatus, events: &mut Vec<DirectoryEvent>) {
        let Some(source) = self.source_mut(channel, provider_id) else {
            return;
        };
        if source.entry.status == status {
            return;
        }

        let old = std::mem::replace(&mut source.entry.status, status.clone());
        if !source.candidate {
            return;
        }

        let name = source.entry.name().to_string();
        let Some(logical_id) = self.by_name.get(&name).copied() else {
            return;
        };
        events.push(DirectoryEvent::SourceStatusChanged { service_id: logical_id, channel, old, new: status });
        self.refresh_status(logical_id, None, events);
    }

    fn apply_groups(&mut self, channel: ChannelId, provider_id: u16, groups: Vec<GroupStatus>, events: &mut Vec<DirectoryEvent>) {
        if groups.is_empty() {
            return;
        }
        let Some(logical_id) = self.logical_id(channel, provider_id) else {
            return;
        };
        for group in groups {
            events.push(DirectoryEvent::GroupStatus { service_id: logical_id, channel, group });
        }
    }

    /// Recomputes the aggregated state as an OR over candidate sources
    fn refresh_status(&mut self, logical_id: u16, pending: Option<&ServiceStatus>, events: &mut Vec<DirectoryEvent>) {
        let Some(service) = self.services.get(&logical_id) else {
            return;
        };

        let mut any_up = pending.is_some_and(|status| status.state == ServiceState::Up);
        let mut any_accepting = pending.is_some_and(|status| status.accepting_requests);
        for (channel, provider_id) in &service.sources {
            let status = self.channels.get(channel).and_then(|directory| directory.get(*provider_id)).map(|source| &source.entry.status);
            if let Some(status) = status {
                any_up |= status.state == ServiceState::Up;
                any_accepting |= status.accepting_requests;
            }
        }

        let state = if any_up { ServiceState::Up } else { ServiceState::Down };
        if service.status.state == state && service.status.accepting_requests == any_accepting {
            return;
        }

        let name = service.name.clone();
        let status = ServiceStatus { state, accepting_requests: any_accepting, status: None };
        if let Some(service) = self.services.get_mut(&logical_id) {
            service.status = status.clone();
        }
        debug!(service = %name, service_id = logical_id, ?state, accepting = any_accepting, "Aggregated service state changed");
        events.push(DirectoryEvent::ServiceStateChanged { service_id: logical_id, name, status });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omm_types::DomainType;
    use omm_types::Qos;
    use omm_types::Rate;
    use omm_types::Timeliness;
    use proptest::prelude::*;

    use crate::registry::FIRST_GENERATED_SERVICE_ID;

    fn feed_info() -> ServiceInfo {
        ServiceInfo::new("DIRECT_FEED").with_capabilities([DomainType::MarketPrice, DomainType::MarketByPrice]).with_qos([Qos::default()])
    }

    fn feed(service_id: u16) -> ServiceEntry {
        ServiceEntry::new(service_id, feed_info())
    }

    fn visible(events: &[DirectoryEvent]) -> Vec<&DirectoryEvent> {
        events.iter().filter(|event| event.is_application_visible()).collect()
    }

    #[test]
    fn test_first_channel_founds_service() {
        let mut aggregator = DirectoryAggregator::new();
        let events = aggregator.on_directory_refresh(ChannelId(0), vec![feed(1)]);

        assert_eq!(
            events,
            vec![
                DirectoryEvent::ServiceAdded { service_id: FIRST_GENERATED_SERVICE_ID, name: "DIRECT_FEED".to_string() },
                DirectoryEvent::SourceAdded { service_id: FIRST_GENERATED_SERVICE_ID, channel: ChannelId(0) },
            ]
        );
        let service = aggregator.service_by_name("DIRECT_FEED").unwrap();
        assert_eq!(service.provider_service_id(ChannelId(0)), Some(1));
        assert_eq!(aggregator.logical_id(ChannelId(0), 1), Some(FIRST_GENERATED_SERVICE_ID));
    }

    #[test]
    fn test_second_channel_merges_silently() {
        let mut aggregator = DirectoryAggregator::new();
        aggregator.on_directory_refresh(ChannelId(0), vec![feed(1)]);
        let events = aggregator.on_directory_refresh(ChannelId(1), vec![feed(8)]);

        assert!(visible(&events).is_empty());
        assert_eq!(aggregator.service_count(), 1);
        let service = aggregator.service_by_name("DIRECT_FEED").unwrap();
        assert_eq!(service.channels().collect::<Vec<_>>(), vec![ChannelId(0), ChannelId(1)]);
        assert_eq!(service.provider_service_id(ChannelId(1)), Some(8));
    }

    #[test]
    fn test_mismatched_qos_is_not_merged() {
        let mut aggregator = DirectoryAggregator::new();
        aggregator.on_directory_refresh(ChannelId(0), vec![feed(1)]);
        let delayed = ServiceEntry::new(1, feed_info().with_qos([Qos::new(Timeliness::Delayed(500), Rate::TickByTick)]));
        let events = aggregator.on_directory_refresh(ChannelId(1), vec![delayed]);

        assert!(events.is_empty());
        let service = aggregator.service_by_name("DIRECT_FEED").unwrap();
        assert_eq!(service.source_count(), 1);
        let source = aggregator.channel_directory(ChannelId(1)).unwrap().get(1).unwrap();
        assert!(!source.candidate);
        assert_eq!(aggregator.logical_id(ChannelId(1), 1), None);
        assert_eq!(aggregator.view().len(), 1);
        assert_eq!(aggregator.view()[0].info.qos, vec![Qos::default()]);
    }

    #[test]
    fn test_channel_loss_deletes_only_with_last_source() {
        let mut aggregator = DirectoryAggregator::new();
        aggregator.on_directory_refresh(ChannelId(0), vec![feed(1)]);
        aggregator.on_directory_refresh(ChannelId(1), vec![feed(1)]);

        let events = aggregator.on_channel_lost(ChannelId(0));
        assert!(visible(&events).is_empty());
        assert_eq!(events, vec![DirectoryEvent::SourceRemoved { service_id: FIRST_GENERATED_SERVICE_ID, channel: ChannelId(0) }]);

        let events = aggregator.on_channel_lost(ChannelId(1));
        assert_eq!(visible(&events), vec![&DirectoryEvent::ServiceDeleted { service_id: FIRST_GENERATED_SERVICE_ID, name: "DIRECT_FEED".to_string() }]);
        assert!(aggregator.service_by_name("DIRECT_FEED").is_none());
        assert!(aggregator.channel_directory(ChannelId(1)).is_none());
    }

    #[test]
    fn test_service_keeps_its_id_when_it_returns() {
        let mut aggregator = DirectoryAggregator::new();
        aggregator.on_directory_refresh(ChannelId(0), vec![ServiceEntry::new(1, ServiceInfo::new("A")), ServiceEntry::new(2, ServiceInfo::new("B"))]);
        let b = aggregator.service_by_name("B").unwrap().service_id;

        aggregator.on_channel_lost(ChannelId(0));
        aggregator.on_directory_refresh(ChannelId(1), vec![ServiceEntry::new(4, ServiceInfo::new("B"))]);
        assert_eq!(aggregator.service_by_name("B").unwrap().service_id, b);
    }

    #[test]
    fn test_aggregated_state_is_or_of_sources() {
        let mut aggregator = DirectoryAggregator::new();
        aggregator.on_directory_refresh(ChannelId(0), vec![feed(1)]);
        aggregator.on_directory_refresh(ChannelId(1), vec![feed(1)]);

        let events = aggregator.on_directory_update(ChannelId(0), vec![ServiceUpdate::status(1, ServiceStatus::down())]);
        assert!(visible(&events).is_empty());
        assert!(matches!(events[0], DirectoryEvent::SourceStatusChanged { channel: ChannelId(0), .. }));

        let events = aggregator.on_directory_update(ChannelId(1), vec![ServiceUpdate::status(1, ServiceStatus::down())]);
        assert_eq!(visible(&events).len(), 1);
        assert!(!aggregator.service_by_name("DIRECT_FEED").unwrap().is_up());

        let events = aggregator.on_directory_update(ChannelId(1), vec![ServiceUpdate::status(1, ServiceStatus::up())]);
        assert_eq!(visible(&events).len(), 1);
        assert!(aggregator.service_by_name("DIRECT_FEED").unwrap().is_up());
    }

    #[test]
    fn test_shape_change_on_merged_source_is_ignored() {
        let mut aggregator = DirectoryAggregator::new();
        aggregator.on_directory_refresh(ChannelId(0), vec![feed(1)]);
        let ranged = feed_info().with_qos_range(true);

        let events = aggregator.on_directory_update(ChannelId(0), vec![ServiceUpdate::info(1, ranged)]);
        assert!(events.is_empty());
        let service = aggregator.service_by_name("DIRECT_FEED").unwrap();
        assert!(!service.info.supports_qos_range);
        assert!(service.has_source(ChannelId(0)));
        assert!(!aggregator.source_entry(ChannelId(0), service.service_id).unwrap().info.supports_qos_range);
    }

    #[test]
    fn test_refresh_with_same_shape_updates_in_place() {
        let mut aggregator = DirectoryAggregator::new();
        aggregator.on_directory_refresh(ChannelId(0), vec![feed(1)]);
        aggregator.on_directory_refresh(ChannelId(1), vec![feed(8)]);

        let dictionaries = ServiceEntry::new(1, feed_info().with_dictionaries_provided(["RWFFld", "RWFEnum"]));
        let events = aggregator.on_directory_refresh(ChannelId(0), vec![dictionaries]);

        assert!(events.is_empty());
        let service = aggregator.service_by_name("DIRECT_FEED").unwrap();
        assert_eq!(service.source_count(), 2);
        let entry = aggregator.source_entry(ChannelId(0), service.service_id).unwrap();
        assert_eq!(entry.info.dictionaries_provided, vec!["RWFFld".to_string(), "RWFEnum".to_string()]);
    }

    #[test]
    fn test_corrected_shape_becomes_candidate() {
        let mut aggregator = DirectoryAggregator::new();
        aggregator.on_directory_refresh(ChannelId(0), vec![feed(1)]);
        aggregator.on_directory_refresh(ChannelId(1), vec![ServiceEntry::new(3, feed_info().with_item_list("OTHER"))]);

        let events = aggregator.on_directory_update(ChannelId(1), vec![ServiceUpdate::info(3, feed_info())]);
        assert_eq!(events, vec![DirectoryEvent::SourceAdded { service_id: FIRST_GENERATED_SERVICE_ID, channel: ChannelId(1) }]);
        assert!(aggregator.channel_directory(ChannelId(1)).unwrap().get(3).unwrap().candidate);
    }

    #[test]
    fn test_orphan_refounds_service_with_same_id() {
        let mut aggregator = DirectoryAggregator::new();
        aggregator.on_directory_refresh(ChannelId(0), vec![feed(1)]);
        let other_shape = feed_info().with_qos_range(true);
        aggregator.on_directory_refresh(ChannelId(1), vec![ServiceEntry::new(2, other_shape)]);

        let events = aggregator.on_channel_lost(ChannelId(0));
        let visible = visible(&events);
        assert_eq!(visible.len(), 2);
        assert!(matches!(visible[0], DirectoryEvent::ServiceDeleted { .. }));
        assert!(matches!(visible[1], DirectoryEvent::ServiceAdded { service_id: FIRST_GENERATED_SERVICE_ID, .. }));

        let service = aggregator.service_by_name("DIRECT_FEED").unwrap();
        assert!(service.info.supports_qos_range);
        assert_eq!(service.provider_service_id(ChannelId(1)), Some(2));
    }

    #[test]
    fn test_update_add_delete_actions() {
        let mut aggregator = DirectoryAggregator::new();
        aggregator.on_directory_refresh(ChannelId(0), vec![]);
        assert!(aggregator.channel_directory(ChannelId(0)).unwrap().is_empty());

        let events = aggregator.on_directory_update(ChannelId(0), vec![ServiceUpdate::add(feed(5))]);
        assert_eq!(visible(&events).len(), 1);

        let events = aggregator.on_directory_update(ChannelId(0), vec![ServiceUpdate::delete(5)]);
        assert!(matches!(visible(&events)[0], DirectoryEvent::ServiceDeleted { .. }));

        let events = aggregator.on_directory_update(ChannelId(0), vec![ServiceUpdate::delete(5), ServiceUpdate::status(9, ServiceStatus::down())]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_group_status_is_translated() {
        let mut aggregator = DirectoryAggregator::new();
        aggregator.on_directory_refresh(ChannelId(0), vec![feed(1)]);
        let group = GroupStatus { group_id: bytes::Bytes::from_static(b"\x00\x01"), state: None, merged_to: None };

        let events = aggregator.on_directory_update(ChannelId(0), vec![ServiceUpdate::group(1, group.clone())]);
        assert_eq!(events, vec![DirectoryEvent::GroupStatus { service_id: FIRST_GENERATED_SERVICE_ID, channel: ChannelId(0), group }]);
    }

    #[test]
    fn test_reserved_ids_come_first() {
        let mut aggregator = DirectoryAggregator::new();
        let reserved = aggregator.reserve_ids(["LIST_A", "LIST_B"]);
        aggregator.on_directory_refresh(ChannelId(0), vec![feed(1)]);

        assert_eq!(reserved, vec![FIRST_GENERATED_SERVICE_ID, FIRST_GENERATED_SERVICE_ID + 1]);
        assert_eq!(aggregator.service_by_name("DIRECT_FEED").unwrap().service_id, FIRST_GENERATED_SERVICE_ID + 2);
    }

    proptest! {
        #[test]
        fn prop_identical_sources_aggregate_once(channels in 1usize..8, removed in 0usize..8) {
            let mut aggregator = DirectoryAggregator::new();
            for index in 0..channels {
                aggregator.on_directory_refresh(ChannelId(index as u32), vec![feed(index as u16 + 1)]);
            }
            prop_assert_eq!(aggregator.service_count(), 1);
            prop_assert_eq!(aggregator.service_by_name("DIRECT_FEED").unwrap().source_count(), channels);

            if channels > 1 {
                let events = aggregator.on_channel_lost(ChannelId((removed % channels) as u32));
                prop_assert!(events.iter().all(|event| !event.is_application_visible()));
                prop_assert_eq!(aggregator.service_by_name("DIRECT_FEED").unwrap().source_count(), channels - 1);
            }
        }

        #[test]
        fn prop_refresh_replay_is_idempotent(names in proptest::collection::btree_set("[A-Z]{1,6}", 1..6), down in any::<bool>()) {
            let entries: Vec<ServiceEntry> = names
                .iter()
                .enumerate()
                .map(|(index, name)| {
                    let status = if down { ServiceStatus::down() } else { ServiceStatus::up() };
                    ServiceEntry::new(index as u16 + 1, ServiceInfo::new(name.clone())).with_status(status)
                })
                .collect();

            let mut aggregator = DirectoryAggregator::new();
            aggregator.on_directory_refresh(ChannelId(0), entries.clone());
            aggregator.on_directory_refresh(ChannelId(1), entries.clone());
            prop_assert!(aggregator.on_directory_refresh(ChannelId(0), entries.clone()).is_empty());
            prop_assert!(aggregator.on_directory_refresh(ChannelId(1), entries).is_empty());
            prop_assert_eq!(aggregator.service_count(), names.len());
        }
    }
}
