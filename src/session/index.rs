use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use indexmap::IndexMap;

use crate::device::types::{CapabilitySet, Handle, ServiceInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub uuid: String,
    pub service_uuid: String,
    pub handle: Handle,
    pub capabilities: CapabilitySet,
}

/// Immutable UUID <-> handle index of one discovery pass.
#[derive(Debug, Default)]
pub struct CharacteristicIndex {
    by_uuid: IndexMap<String, CharacteristicDescriptor>,
    by_handle: HashMap<Handle, String>,
    service_count: usize,
}

pub fn canonical_uuid(uuid: &str) -> String {
    uuid.trim().to_ascii_lowercase()
}

impl CharacteristicIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn build(services: &[ServiceInfo]) -> Self {
        let mut index = CharacteristicIndex { service_count: services.len(), ..Default::default() };

        for service in services {
            for characteristic in &service.characteristics {
                let uuid = canonical_uuid(&characteristic.uuid);
                // a uuid exposed by two services keeps its first handle
                if index.by_uuid.contains_key(&uuid) {
                    continue;
                }
                index.by_handle.insert(characteristic.handle, uuid.clone());
                index.by_uuid.insert(uuid.clone(), CharacteristicDescriptor {
                    uuid,
                    service_uuid: canonical_uuid(&service.uuid),
                    handle: characteristic.handle,
                    capabilities: characteristic.capabilities,
                });
            }
        }

        index
    }

    pub fn get(&self, uuid: &str) -> Option<&CharacteristicDescriptor> {
        self.by_uuid.get(&canonical_uuid(uuid))
    }

    pub fn resolve(&self, handle: Handle) -> Option<&str> {
        self.by_handle.get(&handle).map(String::as_str)
    }

    pub fn descriptors(&self) -> Vec<CharacteristicDescriptor> {
        self.by_uuid.values().cloned().collect()
    }

    pub fn service_count(&self) -> usize {
        self.service_count
    }
}

/// Publication point for the current index. Writers swap in a fully built index; readers take a
/// snapshot and never see a partially built one.
#[derive(Debug, Clone, Default)]
pub struct SharedIndex {
    current: Arc<RwLock<Arc<CharacteristicIndex>>>,
}

impl SharedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<CharacteristicIndex> {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn publish(&self, index: CharacteristicIndex) {
        let index = Arc::new(index);
        match self.current.write() {
            Ok(mut current) => *current = index,
            Err(poisoned) => *poisoned.into_inner() = index,
        }
    }

    pub fn clear(&self) {
        self.publish(CharacteristicIndex::empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::{Capability, CharacteristicInfo};

    fn services(base: Handle) -> Vec<ServiceInfo> {
        vec![ServiceInfo {
            uuid: String::from("0000FFF0-0000-1000-8000-00805F9B34FB"),
            characteristics: vec![
                CharacteristicInfo {
                    uuid: String::from("0000FFF1-0000-1000-8000-00805F9B34FB"),
                    handle: base,
                    capabilities: CapabilitySet::empty().with(Capability::Notify),
                },
                CharacteristicInfo {
                    uuid: String::from("0000fff2-0000-1000-8000-00805f9b34fb"),
                    handle: base + 1,
                    capabilities: CapabilitySet::empty().with(Capability::Read),
                },
            ],
        }]
    }

    #[test]
    fn uuids_are_stored_lowercase() {
        let index = CharacteristicIndex::build(&services(10));
        let descriptor = index.get("0000fff1-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(descriptor.handle, 10);
        assert_eq!(descriptor.service_uuid, "0000fff0-0000-1000-8000-00805f9b34fb");
        assert_eq!(index.resolve(11), Some("0000fff2-0000-1000-8000-00805f9b34fb"));
    }

    #[test]
    fn publishing_replaces_rather_than_merges() {
        let shared = SharedIndex::new();
        shared.publish(CharacteristicIndex::build(&services(10)));
        let old = shared.snapshot();

        shared.publish(CharacteristicIndex::build(&services(300)));
        let new = shared.snapshot();

        assert_eq!(new.resolve(10), None);
        assert_eq!(new.resolve(300), Some("0000fff1-0000-1000-8000-00805f9b34fb"));
        // a reader holding the old snapshot keeps a consistent view
        assert_eq!(old.resolve(10), Some("0000fff1-0000-1000-8000-00805f9b34fb"));
    }
}
