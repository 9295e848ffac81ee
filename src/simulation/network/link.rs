use std::collections::VecDeque;

use crate::simulation::error::SimulationError;
use crate::simulation::network::ctm::CtmLink;
use crate::simulation::network::curve::{CumulativeCurve, FlowDirection};
use crate::simulation::network::pq::PqLink;
use crate::simulation::network::LinkId;
use crate::simulation::random::SimRandom;
use crate::simulation::vehicles::{VehicleClass, VehicleFactory, VehicleId};

/// State shared by every link model: the incoming array filled by the
/// upstream node, the finished array consumed by the downstream node, and the
/// optional cumulative count curves.
#[derive(Debug)]
pub struct LinkCore {
    pub id: LinkId,
    pub incoming: VecDeque<VehicleId>,
    pub finished: VecDeque<VehicleId>,
    pub veh_convert_factor: f64,
    pub flow_scalar: f64,
    pub n_in_car: Option<CumulativeCurve>,
    pub n_out_car: Option<CumulativeCurve>,
    pub n_in_truck: Option<CumulativeCurve>,
    pub n_out_truck: Option<CumulativeCurve>,
}

impl LinkCore {
    pub fn new(id: LinkId, veh_convert_factor: f64, flow_scalar: f64) -> Self {
        LinkCore {
            id,
            incoming: VecDeque::new(),
            finished: VecDeque::new(),
            veh_convert_factor,
            flow_scalar,
            n_in_car: None,
            n_out_car: None,
            n_in_truck: None,
            n_out_truck: None,
        }
    }

    pub fn install_curves(&mut self) {
        self.n_in_car = Some(CumulativeCurve::new());
        self.n_out_car = Some(CumulativeCurve::new());
        self.n_in_truck = Some(CumulativeCurve::new());
        self.n_out_truck = Some(CumulativeCurve::new());
    }

    /// Records moved simulation vehicles on the in-curves. Counts are divided
    /// by the flow scalar; uninstalled curves ignore the record.
    pub fn record_in(&mut self, tick: u32, moved_car: u32, moved_truck: u32) {
        if let Some(curve) = &mut self.n_in_car {
            curve.add_increment(tick, f64::from(moved_car) / self.flow_scalar);
        }
        if let Some(curve) = &mut self.n_in_truck {
            curve.add_increment(tick, f64::from(moved_truck) / self.flow_scalar);
        }
    }

    /// Same as [`record_in`](Self::record_in) for the out-curves.
    pub fn record_out(&mut self, tick: u32, moved_car: u32, moved_truck: u32) {
        if let Some(curve) = &mut self.n_out_car {
            curve.add_increment(tick, f64::from(moved_car) / self.flow_scalar);
        }
        if let Some(curve) = &mut self.n_out_truck {
            curve.add_increment(tick, f64::from(moved_truck) / self.flow_scalar);
        }
    }

    pub fn curve(&self, class: VehicleClass, direction: FlowDirection) -> Option<&CumulativeCurve> {
        match (class, direction) {
            (VehicleClass::Car, FlowDirection::In) => self.n_in_car.as_ref(),
            (VehicleClass::Car, FlowDirection::Out) => self.n_out_car.as_ref(),
            (VehicleClass::Truck, FlowDirection::In) => self.n_in_truck.as_ref(),
            (VehicleClass::Truck, FlowDirection::Out) => self.n_out_truck.as_ref(),
        }
    }
}

/// A link is either a CTM link or a point queue; both share the same external
/// contract towards nodes and the driver.
#[derive(Debug)]
pub enum SimLink {
    Ctm(CtmLink),
    Pq(PqLink),
}

impl SimLink {
    pub fn id(&self) -> LinkId {
        self.core().id
    }

    pub fn core(&self) -> &LinkCore {
        match self {
            SimLink::Ctm(l) => l.core(),
            SimLink::Pq(l) => l.core(),
        }
    }

    pub fn core_mut(&mut self) -> &mut LinkCore {
        match self {
            SimLink::Ctm(l) => l.core_mut(),
            SimLink::Pq(l) => l.core_mut(),
        }
    }

    pub fn veh_convert_factor(&self) -> f64 {
        self.core().veh_convert_factor
    }

    /// Per-tick receiving capacity in real-world vehicles.
    pub fn supply(&self) -> f64 {
        match self {
            SimLink::Ctm(l) => l.link_supply(),
            SimLink::Pq(l) => l.link_supply(),
        }
    }

    pub fn clear_incoming(
        &mut self,
        vehicles: &VehicleFactory,
        tick: u32,
    ) -> Result<(), SimulationError> {
        match self {
            SimLink::Ctm(l) => l.clear_incoming(vehicles, tick),
            SimLink::Pq(l) => {
                l.clear_incoming(vehicles);
                Ok(())
            }
        }
    }

    pub fn evolve(
        &mut self,
        vehicles: &VehicleFactory,
        rnd: &mut SimRandom,
        tick: u32,
    ) -> Result<(), SimulationError> {
        match self {
            SimLink::Ctm(l) => l.evolve(vehicles, rnd, tick),
            SimLink::Pq(l) => {
                l.evolve(vehicles, tick);
                Ok(())
            }
        }
    }

    /// Real-world vehicle volume per class currently on the link.
    pub fn volumes(&self, vehicles: &VehicleFactory) -> (f64, f64) {
        match self {
            SimLink::Ctm(l) => l.volumes(),
            SimLink::Pq(l) => l.volumes(vehicles),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LinkCore;
    use crate::simulation::network::curve::FlowDirection;
    use crate::simulation::network::LinkId;
    use crate::simulation::vehicles::VehicleClass;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn curves_absent_until_installed() {
        let core = LinkCore::new(LinkId(1), 1.5, 2.0);
        assert!(core.curve(VehicleClass::Car, FlowDirection::In).is_none());
    }

    #[test]
    fn recording_scales_by_flow_scalar() {
        let mut core = LinkCore::new(LinkId(1), 1.5, 4.0);
        core.install_curves();
        core.record_in(3, 2, 1);
        core.record_out(3, 0, 4);
        let n_in_car = core.curve(VehicleClass::Car, FlowDirection::In).unwrap();
        assert_approx_eq!(0.5, n_in_car.final_value());
        let n_out_truck = core.curve(VehicleClass::Truck, FlowDirection::Out).unwrap();
        assert_approx_eq!(1.0, n_out_truck.final_value());
    }

    #[test]
    fn recording_without_curves_is_a_no_op() {
        let mut core = LinkCore::new(LinkId(1), 1.0, 1.0);
        core.record_in(1, 5, 5);
        assert!(core.curve(VehicleClass::Car, FlowDirection::In).is_none());
    }
}
