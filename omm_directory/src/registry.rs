use rapidhash::RapidHashMap;

/// First logical service id handed out by the session
pub const FIRST_GENERATED_SERVICE_ID: u16 = 32767;

/// Assigns session-wide logical service ids
///
/// An id, once given to a name, is kept for the lifetime of the session so that a service
/// which disappears and comes back is seen by the application under the same id.
#[derive(Debug)]
pub struct ServiceIdRegistry {
    next_id: u16,
    by_name: RapidHashMap<String, u16>,
}

impl ServiceIdRegistry {
    pub fn new() -> Self {
        Self { next_id: FIRST_GENERATED_SERVICE_ID, by_name: RapidHashMap::default() }
    }

    /// Returns the id for `name`, generating one on first use
    pub fn id_for(&mut self, name: &str) -> u16 {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for ServiceIdRegistry {
    fn default() -> Self {
        Self::new()
    }
}
