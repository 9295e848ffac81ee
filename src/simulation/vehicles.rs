use nohash_hasher::IsEnabled;
use serde::{Deserialize, Serialize};

use crate::simulation::network::{LinkId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleClass {
    Car,
    Truck,
}

impl VehicleClass {
    /// Passenger-car equivalent of one vehicle of this class, given the
    /// truck conversion factor of the link it occupies.
    pub fn equivalent_units(&self, veh_convert_factor: f64) -> f64 {
        match self {
            VehicleClass::Car => 1.0,
            VehicleClass::Truck => veh_convert_factor,
        }
    }
}

/// Stable handle into the vehicle arena. Containers (cell queues, point-queue
/// bags, node queues) store handles; the arena owns the vehicle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VehicleId(pub u32);

impl IsEnabled for VehicleId {}

#[derive(Debug)]
pub struct Vehicle {
    pub id: VehicleId,
    pub class: VehicleClass,
    pub start_time: u32,
    pub finish_time: Option<u32>,
    pub current_link: Option<LinkId>,
    pub next_link: Option<LinkId>,
    pub origin: NodeId,
    pub destination: NodeId,
}

impl Vehicle {
    pub fn has_next_link(&self) -> bool {
        self.next_link.is_some()
    }
}

/// Arena of all vehicles created during a run. Vehicles are never removed;
/// a finished vehicle keeps its record for result queries.
#[derive(Debug, Default)]
pub struct VehicleFactory {
    vehicles: Vec<Vehicle>,
}

impl VehicleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_vehicle(
        &mut self,
        class: VehicleClass,
        start_time: u32,
        origin: NodeId,
        destination: NodeId,
    ) -> VehicleId {
        let id = VehicleId(self.vehicles.len() as u32);
        self.vehicles.push(Vehicle {
            id,
            class,
            start_time,
            finish_time: None,
            current_link: None,
            next_link: None,
            origin,
            destination,
        });
        id
    }

    pub fn get(&self, id: VehicleId) -> &Vehicle {
        &self.vehicles[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: VehicleId) -> &mut Vehicle {
        &mut self.vehicles[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Number of vehicles that have not yet been received by a destination.
    pub fn en_route_count(&self) -> usize {
        self.vehicles
            .iter()
            .filter(|v| v.finish_time.is_none())
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.iter()
    }
}
