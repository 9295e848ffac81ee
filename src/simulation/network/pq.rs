use std::collections::VecDeque;

use crate::simulation::error::SimulationError;
use crate::simulation::network::link::LinkCore;
use crate::simulation::network::LinkRecord;
use crate::simulation::vehicles::{VehicleClass, VehicleFactory, VehicleId};

/// Point queue link: vehicles traverse with a fixed free-flow delay and no
/// in-link congestion propagation. Each vehicle carries a residence stamp in
/// ticks; once the stamp reaches `max_stamp` the vehicle is released into the
/// finished array.
#[derive(Debug)]
pub struct PqLink {
    core: LinkCore,
    length: f64,
    lanes: u32,
    lane_flow_cap: f64,
    unit_time: f64,
    flow_scalar: f64,
    max_stamp: u32,
    veh_queue: VecDeque<(VehicleId, u32)>,
    volume_car: u32,
    volume_truck: u32,
}

impl PqLink {
    pub fn build(
        record: &LinkRecord,
        unit_time: f64,
        flow_scalar: f64,
    ) -> Result<Self, SimulationError> {
        let invalid = |reason: String| SimulationError::InvalidLinkParameter {
            link: record.id,
            reason,
        };

        if record.lane_flow_cap_car < 0.0 {
            return Err(invalid("lane flow capacity can't be negative".to_string()));
        }
        if record.ffs_car <= 0.0 {
            return Err(invalid("free-flow speed must be positive".to_string()));
        }
        if record.veh_convert_factor < 1.0 {
            return Err(invalid("veh_convert_factor can't be less than 1".to_string()));
        }
        if flow_scalar < 1.0 {
            return Err(invalid("flow_scalar can't be less than 1".to_string()));
        }
        if unit_time <= 0.0 {
            return Err(invalid("unit_time must be positive".to_string()));
        }

        // The traversal delay is derived from the car free-flow speed; trucks
        // share the same stamp.
        let max_stamp = (record.length / (record.ffs_car * unit_time)).round() as u32;

        Ok(PqLink {
            core: LinkCore::new(record.id, record.veh_convert_factor, flow_scalar),
            length: record.length,
            lanes: record.lanes,
            lane_flow_cap: record.lane_flow_cap_car,
            unit_time,
            flow_scalar,
            max_stamp,
            veh_queue: VecDeque::new(),
            volume_car: 0,
            volume_truck: 0,
        })
    }

    pub fn core(&self) -> &LinkCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut LinkCore {
        &mut self.core
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn max_stamp(&self) -> u32 {
        self.max_stamp
    }

    /// Per-tick receiving capacity in real-world vehicles. A point queue
    /// never spills back; its supply is the bare flow capacity.
    pub fn link_supply(&self) -> f64 {
        self.lane_flow_cap * f64::from(self.lanes) * self.unit_time
    }

    /// Absorbs incoming vehicles in FIFO order until the per-tick budget is
    /// spent. Cars cost one simulation vehicle, trucks the conversion factor.
    /// Vehicles beyond the budget stay in the incoming array for the next
    /// tick.
    pub fn clear_incoming(&mut self, vehicles: &VehicleFactory) {
        let mut to_be_moved = self.link_supply() * self.flow_scalar;
        while !self.core.incoming.is_empty() {
            if to_be_moved > 0.0 {
                let veh_id = self.core.incoming.pop_front().unwrap();
                self.veh_queue.push_back((veh_id, 0));
                match vehicles.get(veh_id).class {
                    VehicleClass::Car => {
                        self.volume_car += 1;
                        to_be_moved -= 1.0;
                    }
                    VehicleClass::Truck => {
                        self.volume_truck += 1;
                        to_be_moved -= self.core.veh_convert_factor;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// Advances every stamp; vehicles whose stamp has reached the traversal
    /// delay move to the finished array.
    pub fn evolve(&mut self, vehicles: &VehicleFactory, _tick: u32) {
        let mut remaining = VecDeque::with_capacity(self.veh_queue.len());
        while let Some((veh_id, stamp)) = self.veh_queue.pop_front() {
            if stamp >= self.max_stamp {
                match vehicles.get(veh_id).class {
                    VehicleClass::Car => self.volume_car -= 1,
                    VehicleClass::Truck => self.volume_truck -= 1,
                }
                self.core.finished.push_back(veh_id);
            } else {
                remaining.push_back((veh_id, stamp + 1));
            }
        }
        self.veh_queue = remaining;
    }

    /// Real-world vehicle volume per class; vehicles waiting in the finished
    /// array still count as on the link.
    pub fn volumes(&self, vehicles: &VehicleFactory) -> (f64, f64) {
        let mut cars = self.volume_car;
        let mut trucks = self.volume_truck;
        for veh_id in &self.core.finished {
            match vehicles.get(*veh_id).class {
                VehicleClass::Car => cars += 1,
                VehicleClass::Truck => trucks += 1,
            }
        }
        (
            f64::from(cars) / self.flow_scalar,
            f64::from(trucks) / self.flow_scalar,
        )
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.veh_queue.len()
    }
}
