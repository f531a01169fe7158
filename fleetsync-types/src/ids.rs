//! Identifier types used throughout FleetSync.
//!
//! Two kinds of user identifiers exist and they must never be mixed:
//! [`IdentityKey`] is the badge/PIN number assigned by people and is stable
//! across terminals; [`LocalId`] is the row number a terminal assigned on its
//! own and means nothing outside that terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::Error;

/// Port terminals listen on when the inventory does not say otherwise.
pub const DEFAULT_DEVICE_PORT: u16 = 4370;

/// Longest identity key the terminal user table can hold.
pub const MAX_IDENTITY_KEY_LEN: usize = 24;

/// Network endpoint of a terminal.
///
/// Ordered by IP then port; the ordering is the election tie-break, so it
/// must stay stable across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddr(SocketAddr);

impl DeviceAddr {
    /// Creates an address from an IP and port.
    #[must_use]
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(ip, port))
    }

    /// Parses `host:port` or a bare IP (port defaults to 4370).
    pub fn parse(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self(addr));
        }
        s.parse::<IpAddr>()
            .map(|ip| Self::new(ip, DEFAULT_DEVICE_PORT))
            .map_err(|_| Error::InvalidDeviceAddr(s.to_string()))
    }

    /// Returns the IP component.
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    /// Returns the port component.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.0.port()
    }
}

impl fmt::Display for DeviceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceAddr {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceAddr> for String {
    fn from(addr: DeviceAddr) -> Self {
        addr.to_string()
    }
}

/// Group ("area") a terminal belongs to. Rounds never span areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AreaId(pub u32);

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "area-{}", self.0)
    }
}

/// Business-level user key (badge or PIN number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Validates and wraps a key. Surrounding whitespace is trimmed.
    pub fn new(raw: impl AsRef<str>) -> crate::Result<Self> {
        let key = raw.as_ref().trim();
        if key.is_empty() {
            return Err(Error::InvalidIdentityKey(key.to_string(), "empty"));
        }
        if key.len() > MAX_IDENTITY_KEY_LEN {
            return Err(Error::InvalidIdentityKey(key.to_string(), "too long"));
        }
        if key.chars().any(char::is_control) {
            return Err(Error::InvalidIdentityKey(
                key.to_string(),
                "contains control characters",
            ));
        }
        Ok(Self(key.to_string()))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for IdentityKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for IdentityKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdentityKey> for String {
    fn from(key: IdentityKey) -> Self {
        key.0
    }
}

/// Row id a terminal assigned to a user. Only meaningful on that terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub u16);

impl LocalId {
    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
