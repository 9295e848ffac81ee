use std::collections::VecDeque;
use tracing::warn;

use crate::simulation::error::SimulationError;
use crate::simulation::network::link::LinkCore;
use crate::simulation::network::LinkRecord;
use crate::simulation::random::SimRandom;
use crate::simulation::vehicles::{VehicleClass, VehicleFactory, VehicleId};

/// Jam density is capped at 300 veh/mile per lane.
const MAX_LANE_HOLD_CAP: f64 = 300.0 / 1600.0;
/// Flow capacity is capped at 3500 veh/hour per lane.
const MAX_LANE_FLOW_CAP: f64 = 3500.0 / 3600.0;

/// Multiclass (car/truck) cell transmission model link. The link is an
/// ordered sequence of cells; per tick, demand/supply fluxes move integral
/// simulation vehicles between neighboring cells, and the last cell releases
/// its queues into the finished array for the downstream node to consume.
#[derive(Debug)]
pub struct CtmLink {
    core: LinkCore,
    length: f64,
    unit_time: f64,
    flow_scalar: f64,
    wave_speed_car: f64,
    wave_speed_truck: f64,
    num_cells: usize,
    cells: Vec<CtmCell>,
}

impl CtmLink {
    pub fn build(
        record: &LinkRecord,
        unit_time: f64,
        flow_scalar: f64,
    ) -> Result<Self, SimulationError> {
        let invalid = |reason: String| SimulationError::InvalidLinkParameter {
            link: record.id,
            reason,
        };

        if record.lane_hold_cap_car < 0.0 || record.lane_hold_cap_truck < 0.0 {
            return Err(invalid("lane hold capacity can't be negative".to_string()));
        }
        let mut lane_hold_cap_car = record.lane_hold_cap_car;
        if lane_hold_cap_car > MAX_LANE_HOLD_CAP {
            warn!(
                link = record.id.0,
                "car lane hold capacity too large, capped at 300 veh/mile"
            );
            lane_hold_cap_car = MAX_LANE_HOLD_CAP;
        }
        let mut lane_hold_cap_truck = record.lane_hold_cap_truck;
        if lane_hold_cap_truck > MAX_LANE_HOLD_CAP {
            warn!(
                link = record.id.0,
                "truck lane hold capacity too large, capped at 300 veh/mile"
            );
            lane_hold_cap_truck = MAX_LANE_HOLD_CAP;
        }

        if record.lane_flow_cap_car < 0.0 || record.lane_flow_cap_truck < 0.0 {
            return Err(invalid("lane flow capacity can't be negative".to_string()));
        }
        let mut lane_flow_cap_car = record.lane_flow_cap_car;
        if lane_flow_cap_car > MAX_LANE_FLOW_CAP {
            warn!(
                link = record.id.0,
                "car lane flow capacity too large, capped at 3500 veh/hour"
            );
            lane_flow_cap_car = MAX_LANE_FLOW_CAP;
        }
        let mut lane_flow_cap_truck = record.lane_flow_cap_truck;
        if lane_flow_cap_truck > MAX_LANE_FLOW_CAP {
            warn!(
                link = record.id.0,
                "truck lane flow capacity too large, capped at 3500 veh/hour"
            );
            lane_flow_cap_truck = MAX_LANE_FLOW_CAP;
        }

        if record.ffs_car < 0.0 || record.ffs_truck < 0.0 {
            return Err(invalid("free-flow speed can't be negative".to_string()));
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

        let lane_critical_density_car = lane_flow_cap_car / record.ffs_car;
        if lane_hold_cap_car <= lane_critical_density_car {
            return Err(invalid(
                "car hold capacity must exceed the critical density".to_string(),
            ));
        }
        let wave_speed_car =
            lane_flow_cap_car / (lane_hold_cap_car - lane_critical_density_car);

        let lane_critical_density_truck = lane_flow_cap_truck / record.ffs_truck;
        if lane_hold_cap_truck <= lane_critical_density_truck {
            return Err(invalid(
                "truck hold capacity must exceed the critical density".to_string(),
            ));
        }
        let wave_speed_truck =
            lane_flow_cap_truck / (lane_hold_cap_truck - lane_critical_density_truck);

        // Threshold between the semi- and fully-congested regimes; larger
        // than both lane critical densities.
        let lane_rho_1_n =
            lane_hold_cap_car * (wave_speed_car / (record.ffs_truck + wave_speed_car));

        // ffs_car > ffs_truck, so the car speed defines the standard cell
        // length. The last cell absorbs the remainder and is at most twice
        // the standard length.
        let std_cell_length = record.ffs_car * unit_time;
        let mut num_cells = (record.length / std_cell_length).floor() as usize;
        if num_cells == 0 {
            num_cells = 1;
        }
        let last_cell_length = record.length - (num_cells - 1) as f64 * std_cell_length;

        let lanes = record.lanes as f64;
        let mut cells = Vec::with_capacity(num_cells);
        for i in 0..num_cells {
            let cell_length = if i == num_cells - 1 {
                last_cell_length
            } else {
                std_cell_length
            };
            cells.push(CtmCell::new(CellParams {
                cell_length,
                unit_time,
                flow_scalar,
                hold_cap_car: lanes * lane_hold_cap_car,
                hold_cap_truck: lanes * lane_hold_cap_truck,
                critical_density_car: lanes * lane_critical_density_car,
                critical_density_truck: lanes * lane_critical_density_truck,
                rho_1_n: lanes * lane_rho_1_n,
                flow_cap_car: lanes * lane_flow_cap_car,
                flow_cap_truck: lanes * lane_flow_cap_truck,
                ffs_car: record.ffs_car,
                ffs_truck: record.ffs_truck,
                wave_speed_car,
                wave_speed_truck,
            }));
        }

        Ok(CtmLink {
            core: LinkCore::new(record.id, record.veh_convert_factor, flow_scalar),
            length: record.length,
            unit_time,
            flow_scalar,
            wave_speed_car,
            wave_speed_truck,
            num_cells,
            cells,
        })
    }

    pub fn core(&self) -> &LinkCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut LinkCore {
        &mut self.core
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    /// Per-tick receiving capacity of the link in real-world vehicles, from
    /// the combined (truck-converted) density of the entry cell.
    pub fn link_supply(&self) -> f64 {
        let cell = &self.cells[0];
        let real_volume_both = (f64::from(cell.volume_truck) * self.core.veh_convert_factor
            + f64::from(cell.volume_car))
            / self.flow_scalar;
        let density = real_volume_both / cell.cell_length;
        let flux = cell
            .flow_cap_car
            .min(self.wave_speed_car * (cell.hold_cap_car - density));
        flux.max(0.0) * self.unit_time
    }

    /// Drains the incoming array (filled by the upstream node) into the entry
    /// cell. The upstream node is responsible for staying within the link
    /// supply; violating it is an accounting error.
    pub fn clear_incoming(
        &mut self,
        vehicles: &VehicleFactory,
        tick: u32,
    ) -> Result<(), SimulationError> {
        if self.link_supply() * self.flow_scalar < self.core.incoming.len() as f64 {
            return Err(SimulationError::Accounting {
                tick,
                link: self.core.id,
                reason: format!(
                    "{} incoming vehicles exceed the link supply",
                    self.core.incoming.len()
                ),
            });
        }

        while let Some(veh_id) = self.core.incoming.pop_front() {
            match vehicles.get(veh_id).class {
                VehicleClass::Car => self.cells[0].veh_queue_car.push_back(veh_id),
                VehicleClass::Truck => self.cells[0].veh_queue_truck.push_back(veh_id),
            }
        }
        self.cells[0].volume_car = self.cells[0].veh_queue_car.len() as u32;
        self.cells[0].volume_truck = self.cells[0].veh_queue_truck.len() as u32;
        Ok(())
    }

    pub fn evolve(
        &mut self,
        vehicles: &VehicleFactory,
        rnd: &mut SimRandom,
        tick: u32,
    ) -> Result<(), SimulationError> {
        self.update_out_veh();

        for i in 0..self.num_cells - 1 {
            let (head, tail) = self.cells.split_at_mut(i + 1);
            let from = &mut head[i];
            let to = &mut tail[0];
            transfer_front(&mut from.veh_queue_car, &mut to.veh_queue_car, from.out_veh_car);
            transfer_front(
                &mut from.veh_queue_truck,
                &mut to.veh_queue_truck,
                from.out_veh_truck,
            );
        }

        self.move_last_cell(vehicles, rnd, tick)?;

        for i in 0..self.num_cells - 1 {
            let cell = &mut self.cells[i];
            cell.volume_car = cell.veh_queue_car.len() as u32;
            cell.volume_truck = cell.veh_queue_truck.len() as u32;
            cell.update_perceived_density();
        }

        // The last cell counts vehicles already waiting in the finished array
        // as still occupying it.
        let mut finished_cars = 0;
        let mut finished_trucks = 0;
        for veh_id in &self.core.finished {
            match vehicles.get(*veh_id).class {
                VehicleClass::Car => finished_cars += 1,
                VehicleClass::Truck => finished_trucks += 1,
            }
        }
        let last = self.cells.last_mut().unwrap();
        last.volume_car = last.veh_queue_car.len() as u32 + finished_cars;
        last.volume_truck = last.veh_queue_truck.len() as u32 + finished_trucks;
        last.update_perceived_density();

        Ok(())
    }

    /// Computes the pending integral move for every cell boundary. Interior
    /// boundaries use the demand of the sending cell against the supply of
    /// the receiving cell; the entire last-cell queue is a candidate for
    /// crossing the node.
    fn update_out_veh(&mut self) {
        if self.num_cells > 1 {
            for i in 0..self.num_cells - 1 {
                let demand_car = self.cells[i].demand(VehicleClass::Car);
                let supply_car = self.cells[i + 1].supply(VehicleClass::Car);
                let flux_car = self.cells[i].space_fraction_car * demand_car.min(supply_car);
                self.cells[i].out_veh_car = (flux_car * self.flow_scalar).round() as u32;

                let demand_truck = self.cells[i].demand(VehicleClass::Truck);
                let supply_truck = self.cells[i + 1].supply(VehicleClass::Truck);
                let flux_truck =
                    self.cells[i].space_fraction_truck * demand_truck.min(supply_truck);
                self.cells[i].out_veh_truck = (flux_truck * self.flow_scalar).round() as u32;
            }
        }
        let last = self.cells.last_mut().unwrap();
        last.out_veh_car = last.veh_queue_car.len() as u32;
        last.out_veh_truck = last.veh_queue_truck.len() as u32;
    }

    /// Transfers the last cell's candidates into the finished array, with the
    /// two classes interleaved by Bernoulli draws weighted by the car share.
    /// Once one class runs out the remainder of the other drains directly.
    fn move_last_cell(
        &mut self,
        vehicles: &VehicleFactory,
        rnd: &mut SimRandom,
        tick: u32,
    ) -> Result<(), SimulationError> {
        let link_id = self.core.id;
        let finished = &mut self.core.finished;
        let last = self.cells.last_mut().unwrap();
        let mut cars_to_move = last.out_veh_car;
        let mut trucks_to_move = last.out_veh_truck;
        if cars_to_move == 0 && trucks_to_move == 0 {
            return Ok(());
        }
        let p_star = f64::from(cars_to_move) / f64::from(cars_to_move + trucks_to_move);

        let mut transfer = |queue: &mut VecDeque<VehicleId>| -> Result<(), SimulationError> {
            let veh_id = queue.pop_front().unwrap();
            if !vehicles.get(veh_id).has_next_link() {
                return Err(SimulationError::Routing {
                    tick,
                    node: None,
                    reason: format!(
                        "vehicle {:?} reached the end of link {:?} without a next link",
                        veh_id, link_id
                    ),
                });
            }
            finished.push_back(veh_id);
            Ok(())
        };

        while cars_to_move > 0 && trucks_to_move > 0 {
            if rnd.uniform() < p_star {
                transfer(&mut last.veh_queue_car)?;
                cars_to_move -= 1;
            } else {
                transfer(&mut last.veh_queue_truck)?;
                trucks_to_move -= 1;
            }
        }
        for _ in 0..cars_to_move {
            transfer(&mut last.veh_queue_car)?;
        }
        for _ in 0..trucks_to_move {
            transfer(&mut last.veh_queue_truck)?;
        }
        Ok(())
    }

    /// Real-world vehicle volume per class, over all cells. After an evolve
    /// the last cell includes vehicles waiting in the finished array.
    pub fn volumes(&self) -> (f64, f64) {
        let cars: u32 = self.cells.iter().map(|c| c.volume_car).sum();
        let trucks: u32 = self.cells.iter().map(|c| c.volume_truck).sum();
        (
            f64::from(cars) / self.flow_scalar,
            f64::from(trucks) / self.flow_scalar,
        )
    }

    #[cfg(test)]
    pub(crate) fn cell(&self, index: usize) -> &CtmCell {
        &self.cells[index]
    }

    #[cfg(test)]
    pub(crate) fn cell_mut(&mut self, index: usize) -> &mut CtmCell {
        &mut self.cells[index]
    }
}

fn transfer_front(from: &mut VecDeque<VehicleId>, to: &mut VecDeque<VehicleId>, count: u32) {
    for _ in 0..count {
        match from.pop_front() {
            Some(veh) => to.push_back(veh),
            None => break,
        }
    }
}

pub(crate) struct CellParams {
    pub cell_length: f64,
    pub unit_time: f64,
    pub flow_scalar: f64,
    pub hold_cap_car: f64,
    pub hold_cap_truck: f64,
    pub critical_density_car: f64,
    pub critical_density_truck: f64,
    pub rho_1_n: f64,
    pub flow_cap_car: f64,
    pub flow_cap_truck: f64,
    pub ffs_car: f64,
    pub ffs_truck: f64,
    pub wave_speed_car: f64,
    pub wave_speed_truck: f64,
}

/// One cell of a CTM link. Parameters are link-level (lane values scaled by
/// the number of lanes); dynamic state is integer simulation vehicles plus
/// the perceived densities driving the next tick's fluxes.
#[derive(Debug)]
pub(crate) struct CtmCell {
    cell_length: f64,
    unit_time: f64,
    flow_scalar: f64,
    hold_cap_car: f64,
    hold_cap_truck: f64,
    critical_density_car: f64,
    critical_density_truck: f64,
    rho_1_n: f64,
    flow_cap_car: f64,
    flow_cap_truck: f64,
    ffs_car: f64,
    ffs_truck: f64,
    wave_speed_car: f64,
    wave_speed_truck: f64,
    pub(crate) volume_car: u32,
    pub(crate) volume_truck: u32,
    pub(crate) out_veh_car: u32,
    pub(crate) out_veh_truck: u32,
    pub(crate) veh_queue_car: VecDeque<VehicleId>,
    pub(crate) veh_queue_truck: VecDeque<VehicleId>,
    pub(crate) perceived_density_car: f64,
    pub(crate) perceived_density_truck: f64,
    pub(crate) space_fraction_car: f64,
    pub(crate) space_fraction_truck: f64,
}

impl CtmCell {
    fn new(params: CellParams) -> Self {
        CtmCell {
            cell_length: params.cell_length,
            unit_time: params.unit_time,
            flow_scalar: params.flow_scalar,
            hold_cap_car: params.hold_cap_car,
            hold_cap_truck: params.hold_cap_truck,
            critical_density_car: params.critical_density_car,
            critical_density_truck: params.critical_density_truck,
            rho_1_n: params.rho_1_n,
            flow_cap_car: params.flow_cap_car,
            flow_cap_truck: params.flow_cap_truck,
            ffs_car: params.ffs_car,
            ffs_truck: params.ffs_truck,
            wave_speed_car: params.wave_speed_car,
            wave_speed_truck: params.wave_speed_truck,
            volume_car: 0,
            volume_truck: 0,
            out_veh_car: 0,
            out_veh_truck: 0,
            veh_queue_car: VecDeque::new(),
            veh_queue_truck: VecDeque::new(),
            perceived_density_car: 0.0,
            perceived_density_truck: 0.0,
            space_fraction_car: 0.0,
            space_fraction_truck: 0.0,
        }
    }

    /// Recomputes the per-class perceived densities and space fractions from
    /// the current volumes. Three regimes: free flow for both classes,
    /// semi-congested (trucks still free-flowing), and fully congested.
    pub(crate) fn update_perceived_density(&mut self) {
        let density_car = f64::from(self.volume_car) / self.flow_scalar / self.cell_length;
        let density_truck = f64::from(self.volume_truck) / self.flow_scalar / self.cell_length;

        let car_ratio = density_car / self.critical_density_car;
        let truck_ratio = density_truck / self.critical_density_truck;

        if car_ratio + truck_ratio <= 1.0 {
            // Free flow for both classes. Each class perceives its own
            // density inflated by the share the other class occupies.
            self.space_fraction_car = car_ratio;
            self.space_fraction_truck = truck_ratio;
            self.perceived_density_car =
                density_car + self.critical_density_car * self.space_fraction_truck;
            self.perceived_density_truck =
                density_truck + self.critical_density_truck * self.space_fraction_car;
        } else if truck_ratio < 1.0
            && density_car / (1.0 - truck_ratio) <= self.rho_1_n
        {
            // Semi-congested: trucks keep free-flowing, cars are congested in
            // the remaining roadway share.
            self.space_fraction_truck = truck_ratio;
            self.space_fraction_car = 1.0 - self.space_fraction_truck;
            self.perceived_density_car = density_car / self.space_fraction_car;
            self.perceived_density_truck = self.critical_density_truck;
        } else if self.volume_truck == 0 {
            // Fully congested without trucks. Both classes travel at the car
            // speed u; the truck density is what would produce u on the truck
            // fundamental diagram.
            self.space_fraction_car = 1.0;
            self.space_fraction_truck = 0.0;
            self.perceived_density_car = density_car;
            let u = (self.hold_cap_car - density_car) * self.wave_speed_car / density_car;
            self.perceived_density_truck =
                (self.hold_cap_truck * self.wave_speed_truck) / (u + self.wave_speed_truck);
        } else {
            // Fully congested with both classes present.
            let tmp_car = self.hold_cap_car * self.wave_speed_car * density_truck;
            let tmp_truck = self.hold_cap_truck * self.wave_speed_truck * density_car;
            self.space_fraction_car = (density_car * density_car
                * (self.wave_speed_car - self.wave_speed_truck)
                + tmp_truck)
                / (tmp_truck + tmp_car);
            self.space_fraction_truck = (density_car * density_car
                * (self.wave_speed_truck - self.wave_speed_car)
                + tmp_car)
                / (tmp_truck + tmp_car);
            self.perceived_density_car = density_car / self.space_fraction_car;
            self.perceived_density_truck = density_truck / self.space_fraction_truck;
        }
    }

    /// Sending capacity in real-world vehicles per tick.
    pub(crate) fn demand(&self, class: VehicleClass) -> f64 {
        match class {
            VehicleClass::Car => {
                self.flow_cap_car.min(self.ffs_car * self.perceived_density_car) * self.unit_time
            }
            VehicleClass::Truck => {
                self.flow_cap_truck
                    .min(self.ffs_truck * self.perceived_density_truck)
                    * self.unit_time
            }
        }
    }

    /// Receiving capacity in real-world vehicles per tick.
    pub(crate) fn supply(&self, class: VehicleClass) -> f64 {
        let flux = match class {
            VehicleClass::Car => self
                .flow_cap_car
                .min(self.wave_speed_car * (self.hold_cap_car - self.perceived_density_car)),
            VehicleClass::Truck => self
                .flow_cap_truck
                .min(self.wave_speed_truck * (self.hold_cap_truck - self.perceived_density_truck)),
        };
        flux.max(0.0) * self.unit_time
    }
}
