//! Transport capability consumed by the session core.
//!
//! The core never talks to a BLE stack directly. It issues operations
//! through the [`Transport`] trait and consumes the resulting
//! [`TransportEvent`] completions, one at a time, on a single logical
//! context. Trait methods initiate an operation and return immediately;
//! success or failure arrives later as an event. This keeps the core free
//! of any async runtime and makes every driver interchangeable with a mock
//! in tests.
//!
//! ## Driver contract
//!
//! - Events are delivered in completion order; write acknowledgements
//!   arrive in the same order the writes were issued.
//! - [`TransportEvent::Disconnected`] is delivered only after in-flight
//!   events for that peripheral have drained. Reference drivers wait a
//!   short settle delay (~1s) after the link drops before emitting it.

use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

use crate::error::Result;

/// Stable platform-assigned peripheral identifier.
///
/// The platform (BlueZ object path, CoreBluetooth UUID, ...) owns the
/// identifier format; the core only compares and displays it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Wrap a platform identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque characteristic handle assigned by the transport driver during
/// service discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u16);

/// A discovered peripheral summary.
///
/// This is a non-owning view of the platform's peripheral object: identity,
/// advertised name and last-observed signal strength.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Peripheral {
    /// Platform identifier.
    pub id: PeripheralId,
    /// Advertised (human-readable) name.
    pub name: String,
    /// Last-observed RSSI in dBm; more negative is weaker.
    pub rssi: i16,
}

/// Discovered capability set: service UUID to characteristic UUID to handle.
pub type ServiceMap = BTreeMap<Uuid, BTreeMap<Uuid, Handle>>;

/// Completion events delivered by a transport driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connect attempt finished.
    ConnectResult {
        /// Target peripheral.
        id: PeripheralId,
        /// Whether the link came up.
        success: bool,
    },
    /// Service discovery finished for a connected peripheral.
    ServicesDiscovered {
        /// Target peripheral.
        id: PeripheralId,
        /// Discovered services and characteristics.
        services: ServiceMap,
    },
    /// A one-shot characteristic read finished.
    CharacteristicRead {
        /// Target peripheral.
        id: PeripheralId,
        /// Characteristic that was read.
        handle: Handle,
        /// Value, or `None` when the read returned no data.
        value: Option<Vec<u8>>,
    },
    /// The peripheral acknowledged a write-with-response.
    WriteAcknowledged {
        /// Target peripheral.
        id: PeripheralId,
        /// Characteristic that was written.
        handle: Handle,
    },
    /// Inbound notification data from a subscribed characteristic.
    Notification {
        /// Source peripheral.
        id: PeripheralId,
        /// Characteristic that notified.
        handle: Handle,
        /// Raw payload.
        data: Vec<u8>,
    },
    /// The link to a peripheral dropped (requested or not).
    Disconnected {
        /// Affected peripheral.
        id: PeripheralId,
    },
}

impl TransportEvent {
    /// The peripheral this event concerns.
    pub fn peripheral(&self) -> &PeripheralId {
        match self {
            Self::ConnectResult { id, .. }
            | Self::ServicesDiscovered { id, .. }
            | Self::CharacteristicRead { id, .. }
            | Self::WriteAcknowledged { id, .. }
            | Self::Notification { id, .. }
            | Self::Disconnected { id } => id,
        }
    }
}

/// Transport operations the core calls into.
///
/// Every method issues the operation and returns once it has been handed to
/// the underlying stack. An `Err` means the operation could not even be
/// issued; an issued operation reports its outcome via [`TransportEvent`].
pub trait Transport {
    /// Request a connection to the peripheral.
    fn connect(&mut self, id: &PeripheralId) -> Result<()>;

    /// Request service discovery on a connected peripheral.
    fn discover_services(&mut self, id: &PeripheralId) -> Result<()>;

    /// Issue a one-shot read of a characteristic.
    fn read_characteristic(&mut self, id: &PeripheralId, handle: Handle) -> Result<()>;

    /// Issue a write-with-response to a characteristic.
    fn write_characteristic(
        &mut self,
        id: &PeripheralId,
        handle: Handle,
        data: &[u8],
    ) -> Result<()>;

    /// Subscribe to notifications on a characteristic.
    fn subscribe(&mut self, id: &PeripheralId, handle: Handle) -> Result<()>;

    /// Request disconnection from the peripheral.
    fn disconnect(&mut self, id: &PeripheralId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peripheral_id_display_round_trip() {
        let id = PeripheralId::new("hci0/dev_AA_BB");
        assert_eq!(id.to_string(), "hci0/dev_AA_BB");
        assert_eq!(id, PeripheralId::from("hci0/dev_AA_BB"));
    }

    #[test]
    fn test_event_peripheral_accessor() {
        let id = PeripheralId::new("p1");
        let ev = TransportEvent::Disconnected { id: id.clone() };
        assert_eq!(ev.peripheral(), &id);
    }
}
