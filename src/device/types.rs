use std::fmt;

/// Transport-assigned characteristic handle. Only meaningful for the connection that produced it.
pub type Handle = u16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub address: String,
    pub display_name: String,
    pub signal_strength: Option<i16>,
}

impl Device {
    pub fn new(address: impl Into<String>, display_name: Option<String>, signal_strength: Option<i16>) -> Self {
        Device {
            address: address.into(),
            display_name: display_name.unwrap_or_default(),
            signal_strength,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Read,
    Write,
    WriteWithoutResponse,
    Notify,
    Indicate,
}

impl Capability {
    fn bit(self) -> u8 {
        match self {
            Capability::Read => 1 << 0,
            Capability::Write => 1 << 1,
            Capability::WriteWithoutResponse => 1 << 2,
            Capability::Notify => 1 << 3,
            Capability::Indicate => 1 << 4,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Capability::Read => "read",
            Capability::Write => "write",
            Capability::WriteWithoutResponse => "write-without-response",
            Capability::Notify => "notify",
            Capability::Indicate => "indicate",
        }
    }

    const ALL: [Capability; 5] = [
        Capability::Read,
        Capability::Write,
        Capability::WriteWithoutResponse,
        Capability::Notify,
        Capability::Indicate,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub fn empty() -> Self {
        CapabilitySet(0)
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0 |= capability.bit();
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn can_read(&self) -> bool {
        self.contains(Capability::Read)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Capability::Write) || self.contains(Capability::WriteWithoutResponse)
    }

    pub fn can_subscribe(&self) -> bool {
        self.contains(Capability::Notify) || self.contains(Capability::Indicate)
    }

    /// Write with response unless write-without-response is the only write the peripheral offers.
    pub fn prefers_response(&self) -> bool {
        !(self.contains(Capability::WriteWithoutResponse) && !self.contains(Capability::Write))
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|capability| self.contains(*capability))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        iter.into_iter().fold(CapabilitySet::empty(), CapabilitySet::with)
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Capability::name).collect();
        if names.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", names.join(","))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: String,
    pub handle: Handle,
    pub capabilities: CapabilitySet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: String,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// Asynchronous signals coming up from the transport while a connection is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Notification { handle: Handle, payload: Vec<u8> },
    Disconnected,
}
