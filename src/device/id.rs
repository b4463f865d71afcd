//! Device identity types
//!
//! A device identifies itself with a `scheme:value` name, optionally followed
//! by a service path (`mac:112233445566/config`). Only the scheme and value
//! take part in identity; mac values are normalized so every spelling of the
//! same address maps to one registry entry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IdError;

/// Separators tolerated inside mac addresses
const MAC_SEPARATORS: [char; 3] = [':', '-', '.'];

/// Characters a device value may not contain; destinations use them for
/// wildcards and multicast lists
const RESERVED: [char; 2] = ['*', ','];

/// Identity scheme of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Mac,
    Uuid,
    Dns,
    Serial,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Mac => "mac",
            Scheme::Uuid => "uuid",
            Scheme::Dns => "dns",
            Scheme::Serial => "serial",
        }
    }
}

impl FromStr for Scheme {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mac" => Ok(Scheme::Mac),
            "uuid" => Ok(Scheme::Uuid),
            "dns" => Ok(Scheme::Dns),
            "serial" => Ok(Scheme::Serial),
            _ => Err(IdError::UnknownScheme(s.to_string())),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a device, unique within a registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    /// Normalized `scheme:value` form
    name: String,
    scheme: Scheme,
}

impl DeviceId {
    /// Parse and normalize a device name
    ///
    /// Any service path after the first `/` is discarded.
    pub fn parse(name: &str) -> Result<Self, IdError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IdError::Empty);
        }

        let name = match name.split_once('/') {
            Some((identity, _service)) => identity,
            None => name,
        };
        let (scheme, value) = name
            .split_once(':')
            .ok_or_else(|| IdError::MissingScheme(name.to_string()))?;

        let scheme: Scheme = scheme.parse()?;
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        if let Some(c) = value.chars().find(|c| RESERVED.contains(c)) {
            return Err(IdError::ReservedCharacter(c));
        }

        let value = match scheme {
            Scheme::Mac => normalize_mac(value)?,
            _ => value.to_string(),
        };

        Ok(DeviceId {
            name: format!("{}:{}", scheme, value),
            scheme,
        })
    }

    /// The identity scheme
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

fn normalize_mac(value: &str) -> Result<String, IdError> {
    let mac: String = value
        .chars()
        .filter(|c| !MAC_SEPARATORS.contains(c))
        .collect();

    if mac.len() != 12 || !mac.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IdError::InvalidMac(value.to_string()));
    }

    Ok(mac.to_ascii_lowercase())
}

impl FromStr for DeviceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceId::parse(s)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Serialize for DeviceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DeviceId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifies one connection of a device
///
/// Successive connections of the same device get distinct keys, so a stale
/// connection can never remove its replacement from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionKey(pub u64);

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mac_normalizes() {
        let expected = DeviceId::parse("mac:112233445566").unwrap();

        for name in [
            "mac:11:22:33:44:55:66",
            "MAC:11-22-33-44-55-66",
            "mac:1122.3344.5566",
            "mac:112233445566/config",
            "  mac:1122-3344-5566  ",
        ] {
            assert_eq!(DeviceId::parse(name).unwrap(), expected, "{}", name);
        }
        assert_eq!(expected.as_str(), "mac:112233445566");
        assert_eq!(expected.scheme(), Scheme::Mac);
    }

    #[test]
    fn test_parse_mac_uppercase_hex_lowered() {
        let id = DeviceId::parse("mac:AABBCCDDEEFF").unwrap();
        assert_eq!(id.to_string(), "mac:aabbccddeeff");
    }

    #[test]
    fn test_parse_other_schemes() {
        let id = DeviceId::parse("uuid:6f1a2c3d/iot").unwrap();
        assert_eq!(id.as_str(), "uuid:6f1a2c3d");
        assert_eq!(id.scheme(), Scheme::Uuid);

        let id = DeviceId::parse("DNS:gateway.example.com").unwrap();
        assert_eq!(id.as_str(), "dns:gateway.example.com");

        let id = DeviceId::parse("serial:ABC123").unwrap();
        assert_eq!(id.as_str(), "serial:ABC123");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(DeviceId::parse(""), Err(IdError::Empty));
        assert_eq!(DeviceId::parse("mac:"), Err(IdError::Empty));
        assert!(matches!(
            DeviceId::parse("112233445566"),
            Err(IdError::MissingScheme(_))
        ));
        assert!(matches!(
            DeviceId::parse("imei:1234"),
            Err(IdError::UnknownScheme(_))
        ));
        assert!(matches!(
            DeviceId::parse("mac:1122334455"),
            Err(IdError::InvalidMac(_))
        ));
        assert!(matches!(
            DeviceId::parse("mac:11223344556g"),
            Err(IdError::InvalidMac(_))
        ));
    }

    #[test]
    fn test_parse_rejects_destination_syntax() {
        assert_eq!(
            DeviceId::parse("serial:*"),
            Err(IdError::ReservedCharacter('*'))
        );
        assert_eq!(
            DeviceId::parse("serial:a,b"),
            Err(IdError::ReservedCharacter(','))
        );
        assert_eq!(
            DeviceId::parse("mac:11,22,33,44,55,66"),
            Err(IdError::ReservedCharacter(','))
        );
    }

    #[test]
    fn test_serde_as_string() {
        let id = DeviceId::parse("mac:112233445566").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""mac:112233445566""#);

        let back: DeviceId = serde_json::from_str(r#""mac:11-22-33-44-55-66""#).unwrap();
        assert_eq!(back, id);
    }
}
