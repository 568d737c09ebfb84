use std::fmt;
use uuid::Uuid;

use crate::error::LinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Scanning,
    Connecting,
    ServiceDiscovery,
    Connected,
}

impl LinkState {
    /// True while a connection is being established.
    pub fn is_attempting(&self) -> bool {
        matches!(self, LinkState::Connecting | LinkState::ServiceDiscovery)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Scanning => "Scanning",
            LinkState::Connecting => "Connecting",
            LinkState::ServiceDiscovery => "Service discovery",
            LinkState::Connected => "Connected",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    StateChange(LinkState),
    /// A peripheral advertising the target name was seen for the first time in a scan cycle.
    PeripheralMatched(PeripheralAddress),
}

/// Hardware address of a peripheral, `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    pub fn parse(value: &str) -> Result<Self, LinkError> {
        let value = value.trim();
        let octets: Vec<&str> = value.split(|c| c == ':' || c == '-').collect();

        let valid = octets.len() == 6 && octets.iter().all(|octet| {
            octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit())
        });

        if !valid {
            return Err(LinkError::MalformedAddress(value.to_string()));
        }

        Ok(PeripheralAddress(octets.join(":").to_ascii_uppercase()))
    }

    /// Stable stand-in for platforms that hide hardware addresses (CoreBluetooth reports all
    /// zeroes). The result is a locally administered unicast address derived from `id`.
    pub fn from_platform_id(id: &str) -> Self {
        let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes());
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&digest.as_bytes()[10..16]);
        octets[0] = (octets[0] | 0x02) & 0xFE;

        let text: Vec<String> = octets.iter().map(|octet| format!("{:02X}", octet)).collect();
        PeripheralAddress(text.join(":"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_normalized() {
        let address = PeripheralAddress::parse(" aa-bb-cc-dd-ee-ff ").unwrap();
        assert_eq!(address.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        for value in ["", "AA:BB:CC:DD:EE", "AA:BB:CC:DD:EE:FG", "AABBCCDDEEFF", "AA:BB:CC:DD:EE:FF:00"] {
            assert!(matches!(PeripheralAddress::parse(value), Err(LinkError::MalformedAddress(_))), "{}", value);
        }
    }

    #[test]
    fn platform_ids_get_distinct_stable_addresses() {
        let headphones = PeripheralAddress::from_platform_id("PeripheralId(6C2C1F5E-0D4A-4E0B-9F3A-5B1E2D3C4A10)");
        let wearable = PeripheralAddress::from_platform_id("PeripheralId(0F9E8D7C-6B5A-4938-8271-605F4E3D2C1B)");

        assert_ne!(headphones, wearable);
        assert_eq!(wearable, PeripheralAddress::from_platform_id("PeripheralId(0F9E8D7C-6B5A-4938-8271-605F4E3D2C1B)"));
        assert_ne!(wearable.as_str(), "00:00:00:00:00:00");
        // survives a round trip through the store
        assert_eq!(PeripheralAddress::parse(wearable.as_str()).unwrap(), wearable);

        let first_octet = u8::from_str_radix(&wearable.as_str()[..2], 16).unwrap();
        assert_eq!(first_octet & 0x03, 0x02);
    }

    #[test]
    fn only_connecting_and_service_discovery_are_attempts() {
        assert!(LinkState::Connecting.is_attempting());
        assert!(LinkState::ServiceDiscovery.is_attempting());
        assert!(!LinkState::Scanning.is_attempting());
        assert!(!LinkState::Connected.is_attempting());
    }
}
