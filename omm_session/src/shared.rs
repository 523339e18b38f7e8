use std::sync::Arc;

use omm_types::DomainType;
use omm_types::Handle;
use omm_types::MsgKey;
use parking_lot::Mutex;
use rapidhash::RapidHashMap;

use crate::channel::ChannelInfo;
use crate::item::ServiceSelector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleKind {
    Item { domain: DomainType, name: Option<String>, selector: ServiceSelector },
    Batch { domain: DomainType, selector: ServiceSelector, children: Vec<Handle> },
    Login,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleEntry {
    pub kind: HandleKind,
    pub parent: Option<Handle>,
}

/// State read synchronously by application threads, written by the dispatcher
#[derive(Debug, Default)]
pub struct SharedState {
    pub handles: RapidHashMap<Handle, HandleEntry>,
    /// Aggregated service names and their logical ids
    pub services: RapidHashMap<String, u16>,
    pub channels: Vec<ChannelInfo>,
}

impl SharedState {
    /// Logical id of the service a post or generic key names
    pub fn resolve_service(&self, key: &MsgKey) -> Option<u16> {
        if let Some(name) = &key.service_name {
            return self.services.get(name).copied();
        }
        let id = key.service_id?;
        self.services.values().any(|known| *known == id).then_some(id)
    }

    /// Removes a handle; a batch takes its children with it
    pub fn remove(&mut self, handle: Handle) -> Option<HandleEntry> {
        let entry = self.handles.remove(&handle)?;
        if let HandleKind::Batch { children, .. } = &entry.kind {
            for child in children {
                self.handles.remove(child);
            }
        }
        Some(entry)
    }
}

pub type SharedHandle = Arc<Mutex<SharedState>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_service() {
        let mut shared = SharedState::default();
        shared.services.insert("DIRECT_FEED".to_string(), 32767);

        assert_eq!(shared.resolve_service(&MsgKey::default().with_service_name("DIRECT_FEED")), Some(32767));
        assert_eq!(shared.resolve_service(&MsgKey::default().with_service_id(32767)), Some(32767));
        assert_eq!(shared.resolve_service(&MsgKey::default().with_service_id(1)), None);
        assert_eq!(shared.resolve_service(&MsgKey::default()), None);
    }

    #[test]
    fn test_remove_batch_removes_children() {
        let mut shared = SharedState::default();
        let selector = ServiceSelector::Name("FEED".to_string());
        let batch = HandleKind::Batch { domain: DomainType::MarketPrice, selector: selector.clone(), children: vec![Handle(2), Handle(3)] };
        shared.handles.insert(Handle(1), HandleEntry { kind: batch, parent: None });
        for child in [2, 3] {
            let kind = HandleKind::Item { domain: DomainType::MarketPrice, name: None, selector: selector.clone() };
            shared.handles.insert(Handle(child), HandleEntry { kind, parent: Some(Handle(1)) });
        }

        assert_eq!(shared.handles.get(&Handle(3)).and_then(|entry| entry.parent), Some(Handle(1)));
        assert!(shared.remove(Handle(1)).is_some());
        assert!(shared.handles.is_empty());
    }
}
