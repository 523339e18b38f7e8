use rapidhash::RapidHashMap;

/// Consumer-local alias naming an ordered group of concrete services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceList {
    pub name: String,
    pub service_id: u16,
    pub services: Vec<String>,
}

impl ServiceList {
    /// First member, in configured order, accepted by `is_candidate`
    pub fn resolve(&self, mut is_candidate: impl FnMut(&str) -> bool) -> Option<&str> {
        self.services.iter().map(String::as_str).find(|name| is_candidate(name))
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.iter().any(|name| name == service)
    }
}

/// All configured aliases, addressable by name or by their generated id
#[derive(Debug, Clone, Default)]
pub struct ServiceLists {
    lists: Vec<ServiceList>,
    by_name: RapidHashMap<String, usize>,
}

impl ServiceLists {
    pub fn new(lists: Vec<ServiceList>) -> Self {
        let by_name = lists.iter().enumerate().map(|(index, list)| (list.name.clone(), index)).collect();
        Self { lists, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&ServiceList> {
        self.by_name.get(name).map(|index| &self.lists[*index])
    }

    pub fn by_id(&self, service_id: u16) -> Option<&ServiceList> {
        self.lists.iter().find(|list| list.service_id == service_id)
    }

    /// Aliases that include `service` as a member
    pub fn containing<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a ServiceList> + 'a {
        self.lists.iter().filter(move |list| list.contains(service))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceList> {
        self.lists.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lists() -> ServiceLists {
        ServiceLists::new(vec![ServiceList {
            name: "SVG1".to_string(),
            service_id: 32767,
            services: vec!["FEED_A".to_string(), "FEED_B".to_string()],
        }])
    }

    #[test]
    fn test_resolve_in_configured_order() {
        let lists = lists();
        let list = lists.get("SVG1").unwrap();

        assert_eq!(list.resolve(|_| true), Some("FEED_A"));
        assert_eq!(list.resolve(|name| name == "FEED_B"), Some("FEED_B"));
        assert_eq!(list.resolve(|_| false), None);
    }

    #[test]
    fn test_lookup() {
        let lists = lists();
        assert!(lists.get("SVG2").is_none());
        assert_eq!(lists.by_id(32767).map(|list| list.name.as_str()), Some("SVG1"));
        assert_eq!(lists.containing("FEED_B").count(), 1);
        assert_eq!(lists.containing("FEED_C").count(), 0);
    }
}
