use crate::device::constants::UNKNOWN_DEVICE_NAME;
use crate::device::types::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    All,
    NamedOnly,
    UnnamedOnly,
}

/// Result of the most recent scan. Every scan replaces the previous set wholesale.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

pub fn has_name(device: &Device) -> bool {
    let name = device.display_name.trim();
    !name.is_empty() && name != UNKNOWN_DEVICE_NAME
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_scan(&mut self, devices: Vec<Device>) {
        self.devices = devices;
    }

    /// Devices of the last scan in discovery order, narrowed by `filter_mode`.
    pub fn view(&self, filter_mode: FilterMode) -> Vec<Device> {
        self.devices
            .iter()
            .filter(|device| match filter_mode {
                FilterMode::All => true,
                FilterMode::NamedOnly => has_name(device),
                FilterMode::UnnamedOnly => !has_name(device),
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan() -> Vec<Device> {
        vec![
            Device::new("AA", Some(String::from("Thermo")), Some(-40)),
            Device::new("BB", None, None),
            Device::new("CC", Some(String::from(UNKNOWN_DEVICE_NAME)), Some(-90)),
            Device::new("DD", Some(String::from("Pump")), None),
        ]
    }

    fn addresses(devices: &[Device]) -> Vec<&str> {
        devices.iter().map(|d| d.address.as_str()).collect()
    }

    #[test]
    fn all_keeps_discovery_order() {
        let mut registry = DeviceRegistry::new();
        registry.record_scan(scan());
        assert_eq!(addresses(&registry.view(FilterMode::All)), vec!["AA", "BB", "CC", "DD"]);
    }

    #[test]
    fn named_and_unnamed_partition_the_scan() {
        let mut registry = DeviceRegistry::new();
        registry.record_scan(scan());
        assert_eq!(addresses(&registry.view(FilterMode::NamedOnly)), vec!["AA", "DD"]);
        assert_eq!(addresses(&registry.view(FilterMode::UnnamedOnly)), vec!["BB", "CC"]);
    }

    #[test]
    fn a_new_scan_replaces_the_old_one() {
        let mut registry = DeviceRegistry::new();
        registry.record_scan(scan());
        registry.record_scan(vec![Device::new("EE", Some(String::from("Valve")), None)]);

        assert_eq!(addresses(&registry.view(FilterMode::All)), vec!["EE"]);
        assert!(registry.view(FilterMode::UnnamedOnly).is_empty());
    }
}
