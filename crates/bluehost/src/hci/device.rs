//! Remote device records and the registry keyed by address
//!
//! The HCI layer owns one [`RemoteDevice`] per peer it has ever seen
//! (inquiry result, incoming connection, or a record loaded from the device
//! store). Records are removed only by explicit unpair/removal or stack
//! teardown; link keys persist across sessions through the store.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A Bluetooth device address in wire (little-endian) byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 6 {
            return None;
        }
        let mut addr = [0u8; 6];
        addr.copy_from_slice(bytes);
        Some(Self(addr))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Wire order is little-endian; humans read the address reversed
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[5], self.0[4], self.0[3], self.0[2], self.0[1], self.0[0]
        )
    }
}

impl FromStr for BdAddr {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(());
        }
        let mut addr = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            addr[5 - i] = u8::from_str_radix(part, 16).map_err(|_| ())?;
        }
        Ok(Self(addr))
    }
}

/// Link key types as reported by LINK_KEY_NOTIFICATION.
///
/// The wire value for `Combination` is 0x00, which the original on-disk
/// format also used for "no key"; the store writes it as the 0xFF sentinel
/// instead (see [`LinkKeyType::to_stored`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKeyType {
    Combination,
    LocalUnit,
    RemoteUnit,
    DebugCombination,
    UnauthenticatedP192,
    AuthenticatedP192,
    ChangedCombination,
    UnauthenticatedP256,
    AuthenticatedP256,
}

impl LinkKeyType {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Combination),
            0x01 => Some(Self::LocalUnit),
            0x02 => Some(Self::RemoteUnit),
            0x03 => Some(Self::DebugCombination),
            0x04 => Some(Self::UnauthenticatedP192),
            0x05 => Some(Self::AuthenticatedP192),
            0x06 => Some(Self::ChangedCombination),
            0x07 => Some(Self::UnauthenticatedP256),
            0x08 => Some(Self::AuthenticatedP256),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Combination => 0x00,
            Self::LocalUnit => 0x01,
            Self::RemoteUnit => 0x02,
            Self::DebugCombination => 0x03,
            Self::UnauthenticatedP192 => 0x04,
            Self::AuthenticatedP192 => 0x05,
            Self::ChangedCombination => 0x06,
            Self::UnauthenticatedP256 => 0x07,
            Self::AuthenticatedP256 => 0x08,
        }
    }

    /// Stored representation: Combination maps to 0xFF so a real key type
    /// never collides with the file format's historical "no key" zero
    pub fn to_stored(self) -> u8 {
        match self {
            Self::Combination => 0xFF,
            other => other.to_wire(),
        }
    }

    pub fn from_stored(value: u8) -> Option<Self> {
        match value {
            0xFF => Some(Self::Combination),
            other => Self::from_wire(other),
        }
    }
}

/// A stored pairing key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkKey {
    pub key: [u8; 16],
    pub key_type: LinkKeyType,
}

/// Lifecycle of the HCI link to a remote device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No link, none being set up
    #[default]
    Idle,
    /// CREATE_CONNECTION sent (or incoming request accepted), waiting for
    /// CONNECTION_COMPLETE
    Connecting,
    /// Link open on this handle
    Connected(u16),
    /// The last connection attempt failed
    Failed,
}

impl ConnectionState {
    /// The open link's handle, if any
    pub fn handle(&self) -> Option<u16> {
        match self {
            Self::Connected(handle) => Some(*handle),
            _ => None,
        }
    }
}

/// Everything the stack knows about one remote device
#[derive(Debug, Clone)]
pub struct RemoteDevice {
    pub addr: BdAddr,
    pub class_of_device: [u8; 3],
    pub name: Option<String>,
    pub state: ConnectionState,
    pub link_key: Option<LinkKey>,
    pub page_scan_repetition_mode: u8,
    pub clock_offset: u16,
}

impl RemoteDevice {
    pub fn new(addr: BdAddr) -> Self {
        Self {
            addr,
            class_of_device: [0; 3],
            name: None,
            state: ConnectionState::Idle,
            link_key: None,
            page_scan_repetition_mode: 0,
            clock_offset: 0,
        }
    }
}

/// Registry of remote devices owned by the HCI layer
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<BdAddr, RemoteDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find an existing record or create a fresh one
    pub fn upsert(&mut self, addr: BdAddr) -> &mut RemoteDevice {
        self.devices.entry(addr).or_insert_with(|| RemoteDevice::new(addr))
    }

    pub fn get(&self, addr: &BdAddr) -> Option<&RemoteDevice> {
        self.devices.get(addr)
    }

    pub fn get_mut(&mut self, addr: &BdAddr) -> Option<&mut RemoteDevice> {
        self.devices.get_mut(addr)
    }

    pub fn by_handle(&self, handle: u16) -> Option<&RemoteDevice> {
        self.devices
            .values()
            .find(|d| d.state.handle() == Some(handle))
    }

    pub fn by_handle_mut(&mut self, handle: u16) -> Option<&mut RemoteDevice> {
        self.devices
            .values_mut()
            .find(|d| d.state.handle() == Some(handle))
    }

    pub fn by_name(&self, name: &str) -> Option<&RemoteDevice> {
        self.devices
            .values()
            .find(|d| d.name.as_deref() == Some(name))
    }

    pub fn remove(&mut self, addr: &BdAddr) -> Option<RemoteDevice> {
        self.devices.remove(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteDevice> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bd_addr_display_roundtrip() {
        let addr = BdAddr([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        let text = addr.to_string();
        assert_eq!(text, "06:05:04:03:02:01");
        assert_eq!(text.parse::<BdAddr>().unwrap(), addr);
    }

    #[test]
    fn test_bd_addr_parse_rejects_garbage() {
        assert!("06:05:04:03:02".parse::<BdAddr>().is_err());
        assert!("06:05:04:03:02:GG".parse::<BdAddr>().is_err());
        assert!("".parse::<BdAddr>().is_err());
    }

    #[test]
    fn test_link_key_type_stored_sentinel() {
        // Combination is 0x00 on the wire but must never be stored as zero
        assert_eq!(LinkKeyType::Combination.to_wire(), 0x00);
        assert_eq!(LinkKeyType::Combination.to_stored(), 0xFF);
        assert_eq!(
            LinkKeyType::from_stored(0xFF),
            Some(LinkKeyType::Combination)
        );
        assert_eq!(
            LinkKeyType::from_stored(0x04),
            Some(LinkKeyType::UnauthenticatedP192)
        );
        assert_eq!(LinkKeyType::from_stored(0x00), Some(LinkKeyType::Combination));
    }

    #[test]
    fn test_registry_handle_lookup() {
        let mut registry = DeviceRegistry::new();
        let addr = BdAddr([1, 2, 3, 4, 5, 6]);
        registry.upsert(addr).state = ConnectionState::Connected(0x0040);

        assert_eq!(registry.by_handle(0x0040).unwrap().addr, addr);
        assert!(registry.by_handle(0x0041).is_none());

        registry.get_mut(&addr).unwrap().state = ConnectionState::Idle;
        assert!(registry.by_handle(0x0040).is_none());
    }
}
