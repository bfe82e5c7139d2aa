//! Bluetooth hardware addresses.
//!
//! Beacon identities are plain strings so that any scanner can feed the
//! aggregator, but both bundled backends and the `save` command go through
//! [`MacAddress`] to agree on one canonical spelling.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 6-byte Bluetooth device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Build an address from the little-endian byte order used on the HCI wire.
    pub fn from_le_bytes(mut bytes: [u8; 6]) -> Self {
        bytes.reverse();
        Self(bytes)
    }

    /// Canonical form of a user-supplied identity.
    ///
    /// Strings that parse as an address come back upper-cased; anything else is
    /// returned trimmed but otherwise untouched.
    pub fn canonicalize(identity: &str) -> String {
        let identity = identity.trim();
        identity
            .parse::<MacAddress>()
            .map(|mac| mac.to_string())
            .unwrap_or_else(|_| identity.to_string())
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Errors returned when parsing a MAC address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid MAC address: expected 6 octets, got {0}")]
    WrongOctetCount(usize),
    #[error("invalid MAC address: '{0}' is not a two-digit hex octet")]
    BadOctet(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s.split([':', '-']).collect();
        if octets.len() != 6 {
            return Err(ParseMacError::WrongOctetCount(octets.len()));
        }

        let mut bytes = [0u8; 6];
        for (byte, octet) in bytes.iter_mut().zip(&octets) {
            if octet.len() != 2 || !octet.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseMacError::BadOctet(octet.to_string()));
            }
            *byte = u8::from_str_radix(octet, 16)
                .map_err(|_| ParseMacError::BadOctet(octet.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_pads_and_uppercases() {
        let addr = MacAddress([0x0a, 0x01, 0xbc, 0x03, 0x04, 0xff]);
        assert_eq!(addr.to_string(), "0A:01:BC:03:04:FF");
    }

    #[test]
    fn test_from_le_bytes_reverses() {
        let addr = MacAddress::from_le_bytes([0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_parse_accepts_dashes_and_lowercase() {
        let addr: MacAddress = "aa-bb-cc-dd-ee-ff".parse().unwrap();
        assert_eq!(addr.0, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "AA:BB".parse::<MacAddress>(),
            Err(ParseMacError::WrongOctetCount(2))
        );
        assert_eq!(
            "AA:BB:CC:DD:EE:G1".parse::<MacAddress>(),
            Err(ParseMacError::BadOctet("G1".to_string()))
        );
        assert_eq!(
            "AA:BB:CC:DD:EE:F".parse::<MacAddress>(),
            Err(ParseMacError::BadOctet("F".to_string()))
        );
        assert_eq!(
            "AA:BB:CC:DD:EE:+F".parse::<MacAddress>(),
            Err(ParseMacError::BadOctet("+F".to_string()))
        );
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(
            MacAddress::canonicalize(" aa:bb:cc:dd:ee:ff "),
            "AA:BB:CC:DD:EE:FF"
        );
        assert_eq!(MacAddress::canonicalize("AA:BB"), "AA:BB");
        assert_eq!(
            MacAddress::canonicalize("aa:bb:cc:dd:ee:+f"),
            "aa:bb:cc:dd:ee:+f"
        );
    }
}
