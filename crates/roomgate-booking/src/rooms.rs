//! Room device plans.
//!
//! Which peripheral plays which part in a room is deployment wiring,
//! configured once at startup, the same way bus addresses are.

use roomgate_core::{DeviceId, RoomId};
use std::collections::HashMap;

/// The peripherals acting for one room.
#[derive(Debug, Clone)]
pub struct RoomPlan {
    pub room_id: RoomId,
    pub door: DeviceId,
    pub lights: DeviceId,
    pub ac: DeviceId,
    pub outlets: DeviceId,
    pub display: DeviceId,
    pub buzzer: DeviceId,
}

/// All configured rooms.
#[derive(Debug, Clone, Default)]
pub struct RoomDirectory {
    rooms: HashMap<RoomId, RoomPlan>,
}

impl RoomDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, plan: RoomPlan) {
        self.rooms.insert(plan.room_id.clone(), plan);
    }

    #[must_use]
    pub fn get(&self, room_id: &RoomId) -> Option<&RoomPlan> {
        self.rooms.get(room_id)
    }
}

impl FromIterator<RoomPlan> for RoomDirectory {
    fn from_iter<I: IntoIterator<Item = RoomPlan>>(iter: I) -> Self {
        let mut directory = Self::new();
        for plan in iter {
            directory.insert(plan);
        }
        directory
    }
}
