//! Deployment configuration.
//!
//! Bus wiring and room device plans come from a JSON file:
//!
//! ```json
//! {
//!   "devices": [
//!     { "device_id": "door-1", "bus_address": "D" }
//!   ],
//!   "rooms": [
//!     {
//!       "room_id": "atlantis",
//!       "door": "door-1", "lights": "lights-1", "ac": "ac-1",
//!       "outlets": "outlets-1", "display": "display-1", "buzzer": "buzzer-1"
//!     }
//!   ]
//! }
//! ```

use roomgate_booking::{RoomDirectory, RoomPlan};
use roomgate_core::{BusAddress, DeviceId, Error, Result, RoomId};
use roomgate_dispatch::AddressBook;
use serde::Deserialize;
use std::path::Path;

/// One bus-attached peripheral.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub device_id: DeviceId,
    pub bus_address: BusAddressEntry,
}

/// Bus address as a one-letter string in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct BusAddressEntry(pub BusAddress);

impl TryFrom<String> for BusAddressEntry {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Ok(BusAddressEntry(s.parse()?))
    }
}

/// One room's device plan.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomEntry {
    pub room_id: RoomId,
    pub door: DeviceId,
    pub lights: DeviceId,
    pub ac: DeviceId,
    pub outlets: DeviceId,
    pub display: DeviceId,
    pub buzzer: DeviceId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub rooms: Vec<RoomEntry>,
}

impl GatewayConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns `Error::Config` when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))
    }

    #[must_use]
    pub fn address_book(&self) -> AddressBook {
        self.devices
            .iter()
            .map(|d| (d.device_id.clone(), d.bus_address.0))
            .collect()
    }

    #[must_use]
    pub fn room_directory(&self) -> RoomDirectory {
        self.rooms
            .iter()
            .map(|r| RoomPlan {
                room_id: r.room_id.clone(),
                door: r.door.clone(),
                lights: r.lights.clone(),
                ac: r.ac.clone(),
                outlets: r.outlets.clone(),
                display: r.display.clone(),
                buzzer: r.buzzer.clone(),
            })
            .collect()
    }
}
