use nohash_hasher::IntMap;
use std::collections::VecDeque;

use crate::simulation::error::SimulationError;
use crate::simulation::network::link::SimLink;
use crate::simulation::network::{LinkId, NodeId};
use crate::simulation::random::SimRandom;
use crate::simulation::vehicles::{VehicleClass, VehicleFactory, VehicleId};

/// Tolerance for exhausted flow budgets. Converting real-world flows to
/// simulation-vehicle budgets and back leaves residues around 1e-16 which
/// must not be mistaken for unserved demand.
const FLOW_EPSILON: f64 = 1e-9;

#[derive(Debug)]
pub enum SimNode {
    Origin(OriginNode),
    Destination(DestinationNode),
    Junction(JunctionNode),
}

impl SimNode {
    pub fn id(&self) -> NodeId {
        match self {
            SimNode::Origin(n) => n.id,
            SimNode::Destination(n) => n.id,
            SimNode::Junction(n) => n.id,
        }
    }

    pub fn evolve(
        &mut self,
        links: &mut IntMap<LinkId, SimLink>,
        vehicles: &mut VehicleFactory,
        rnd: &mut SimRandom,
        tick: u32,
    ) -> Result<(), SimulationError> {
        match self {
            SimNode::Origin(n) => n.evolve(links, vehicles, tick),
            SimNode::Destination(n) => n.evolve(links, vehicles, tick),
            SimNode::Junction(n) => n.evolve(links, vehicles, rnd, tick),
        }
    }
}

/// Origin node: vehicles released by the demand schedule wait here until the
/// supply of their first link admits them.
#[derive(Debug)]
pub struct OriginNode {
    pub id: NodeId,
    pub in_veh_queue: VecDeque<VehicleId>,
    pub out_links: Vec<LinkId>,
}

impl OriginNode {
    pub fn new(id: NodeId, out_links: Vec<LinkId>) -> Self {
        OriginNode {
            id,
            in_veh_queue: VecDeque::new(),
            out_links,
        }
    }

    fn evolve(
        &mut self,
        links: &mut IntMap<LinkId, SimLink>,
        vehicles: &mut VehicleFactory,
        tick: u32,
    ) -> Result<(), SimulationError> {
        // Class-weighted pending volume per out-link, in simulation
        // equivalents.
        let mut out_volume: IntMap<LinkId, f64> = IntMap::default();
        for link_id in &self.out_links {
            out_volume.insert(*link_id, 0.0);
        }
        for veh_id in &self.in_veh_queue {
            let veh = vehicles.get(*veh_id);
            let next = veh.next_link.ok_or_else(|| SimulationError::Routing {
                tick,
                node: Some(self.id),
                reason: format!("vehicle {:?} waits at an origin without a next link", veh_id),
            })?;
            let volume = out_volume.get_mut(&next).ok_or_else(|| {
                SimulationError::Routing {
                    tick,
                    node: Some(self.id),
                    reason: format!(
                        "vehicle {:?} heads to link {:?} which does not leave this origin",
                        veh_id, next
                    ),
                }
            })?;
            let cvt = links.get(&next).unwrap().veh_convert_factor();
            *volume += veh.class.equivalent_units(cvt);
        }

        // Cap the release at the supply of each out-link.
        for link_id in &self.out_links {
            let link = links.get(link_id).unwrap();
            let cap = (link.supply() * link.core().flow_scalar).floor();
            let volume = out_volume.get_mut(link_id).unwrap();
            if cap < *volume {
                *volume = cap;
            }
        }

        // One scan of the queue per out-link, popping matching vehicles until
        // the budget runs out.
        for link_id in &self.out_links {
            let mut budget = *out_volume.get(link_id).unwrap();
            let cvt = links.get(link_id).unwrap().veh_convert_factor();
            let mut moved_car = 0;
            let mut moved_truck = 0;
            let mut idx = 0;
            while idx < self.in_veh_queue.len() {
                if budget <= 0.0 {
                    break;
                }
                let veh_id = self.in_veh_queue[idx];
                if vehicles.get(veh_id).next_link == Some(*link_id) {
                    self.in_veh_queue.remove(idx);
                    let veh = vehicles.get_mut(veh_id);
                    veh.current_link = Some(*link_id);
                    match veh.class {
                        VehicleClass::Car => {
                            budget -= 1.0;
                            moved_car += 1;
                        }
                        VehicleClass::Truck => {
                            budget -= cvt;
                            moved_truck += 1;
                        }
                    }
                    links
                        .get_mut(link_id)
                        .unwrap()
                        .core_mut()
                        .incoming
                        .push_back(veh_id);
                } else {
                    idx += 1;
                }
            }
            links
                .get_mut(link_id)
                .unwrap()
                .core_mut()
                .record_in(tick + 1, moved_car, moved_truck);
        }
        Ok(())
    }
}

/// Destination node: absorbs vehicles whose route is exhausted.
#[derive(Debug)]
pub struct DestinationNode {
    pub id: NodeId,
    pub in_links: Vec<LinkId>,
    pub out_veh_queue: VecDeque<VehicleId>,
}

impl DestinationNode {
    pub fn new(id: NodeId, in_links: Vec<LinkId>) -> Self {
        DestinationNode {
            id,
            in_links,
            out_veh_queue: VecDeque::new(),
        }
    }

    fn evolve(
        &mut self,
        links: &mut IntMap<LinkId, SimLink>,
        vehicles: &mut VehicleFactory,
        tick: u32,
    ) -> Result<(), SimulationError> {
        for link_id in &self.in_links {
            let mut moved_car = 0;
            let mut moved_truck = 0;
            let link = links.get_mut(link_id).unwrap();
            while let Some(veh_id) = link.core_mut().finished.pop_front() {
                let veh = vehicles.get_mut(veh_id);
                if veh.next_link.is_some() {
                    return Err(SimulationError::Routing {
                        tick,
                        node: Some(self.id),
                        reason: format!(
                            "vehicle {:?} reached a destination with a remaining next link",
                            veh_id
                        ),
                    });
                }
                veh.current_link = None;
                match veh.class {
                    VehicleClass::Car => moved_car += 1,
                    VehicleClass::Truck => moved_truck += 1,
                }
                self.out_veh_queue.push_back(veh_id);
            }
            link.core_mut().record_out(tick + 1, moved_car, moved_truck);
        }
        Ok(())
    }
}

/// Junction node: apportions the finished vehicles of its in-links among its
/// out-links under demand and supply constraints, then moves integral
/// vehicles with stochastic rounding.
#[derive(Debug)]
pub struct JunctionNode {
    pub id: NodeId,
    pub in_links: Vec<LinkId>,
    pub out_links: Vec<LinkId>,
    flow_scalar: f64,
    /// Dense |in| x |out| matrices in real-world vehicles.
    demand: Vec<f64>,
    supply: Vec<f64>,
    veh_flow: Vec<f64>,
    /// Moved counts per (in, out) pair in simulation vehicles.
    veh_moved_car: Vec<u32>,
    veh_moved_truck: Vec<u32>,
}

impl JunctionNode {
    pub fn new(id: NodeId, in_links: Vec<LinkId>, out_links: Vec<LinkId>, flow_scalar: f64) -> Self {
        let pairs = in_links.len() * out_links.len();
        JunctionNode {
            id,
            flow_scalar,
            demand: vec![0.0; pairs],
            supply: vec![0.0; out_links.len()],
            veh_flow: vec![0.0; pairs],
            veh_moved_car: vec![0; pairs],
            veh_moved_truck: vec![0; pairs],
            in_links,
            out_links,
        }
    }

    fn evolve(
        &mut self,
        links: &mut IntMap<LinkId, SimLink>,
        vehicles: &mut VehicleFactory,
        rnd: &mut SimRandom,
        tick: u32,
    ) -> Result<(), SimulationError> {
        self.prepare_supply_and_demand(links, vehicles, tick)?;
        self.compute_flow();
        self.move_vehicles(links, vehicles, rnd, tick)?;
        self.record_cumulative_curves(links, tick);
        Ok(())
    }

    fn prepare_supply_and_demand(
        &mut self,
        links: &IntMap<LinkId, SimLink>,
        vehicles: &VehicleFactory,
        tick: u32,
    ) -> Result<(), SimulationError> {
        let offset = self.out_links.len();
        self.demand.fill(0.0);
        self.veh_flow.fill(0.0);
        self.veh_moved_car.fill(0);
        self.veh_moved_truck.fill(0);

        for (i, in_id) in self.in_links.iter().enumerate() {
            let in_link = links.get(in_id).unwrap();
            let cvt = in_link.veh_convert_factor();
            for veh_id in &in_link.core().finished {
                let veh = vehicles.get(*veh_id);
                let next = veh.next_link.ok_or_else(|| SimulationError::Routing {
                    tick,
                    node: Some(self.id),
                    reason: format!(
                        "vehicle {:?} finished link {:?} without a next link",
                        veh_id, in_id
                    ),
                })?;
                let j = self
                    .out_links
                    .iter()
                    .position(|out| *out == next)
                    .ok_or_else(|| SimulationError::Routing {
                        tick,
                        node: Some(self.id),
                        reason: format!(
                            "vehicle {:?} heads to link {:?} which does not leave this node",
                            veh_id, next
                        ),
                    })?;
                self.demand[i * offset + j] += veh.class.equivalent_units(cvt);
            }
        }
        for d in &mut self.demand {
            *d /= self.flow_scalar;
        }

        for (j, out_id) in self.out_links.iter().enumerate() {
            self.supply[j] = links.get(out_id).unwrap().supply();
        }
        Ok(())
    }

    /// Fair-weighted-junction rule: each in-link receives a share of the
    /// out-link supply proportional to its demand, never more than the
    /// demand itself.
    fn compute_flow(&mut self) {
        let offset = self.out_links.len();
        for j in 0..self.out_links.len() {
            let total_demand: f64 = (0..self.in_links.len())
                .map(|i| self.demand[i * offset + j])
                .sum();
            for i in 0..self.in_links.len() {
                let demand = self.demand[i * offset + j];
                let portion = if total_demand > 0.0 {
                    demand / total_demand
                } else {
                    0.0
                };
                self.veh_flow[i * offset + j] = demand.min(portion * self.supply[j]);
            }
        }
    }

    fn move_vehicles(
        &mut self,
        links: &mut IntMap<LinkId, SimLink>,
        vehicles: &mut VehicleFactory,
        rnd: &mut SimRandom,
        tick: u32,
    ) -> Result<(), SimulationError> {
        let offset = self.out_links.len();
        for (j, out_id) in self.out_links.iter().enumerate() {
            for (i, in_id) in self.in_links.iter().enumerate() {
                let mut to_move = self.veh_flow[i * offset + j] * self.flow_scalar;
                let cvt = links.get(in_id).unwrap().veh_convert_factor();

                let mut moved: Vec<VehicleId> = Vec::new();
                let finished = &mut links.get_mut(in_id).unwrap().core_mut().finished;
                let mut idx = 0;
                while idx < finished.len() {
                    if to_move <= 0.0 {
                        break;
                    }
                    let veh_id = finished[idx];
                    let veh = vehicles.get(veh_id);
                    if veh.next_link == Some(*out_id) {
                        let equiv = veh.class.equivalent_units(cvt);
                        // A budget below one equivalent moves the vehicle
                        // with probability to_move / equiv; the budget is
                        // consumed either way.
                        let moves = to_move >= equiv || rnd.uniform() <= to_move / equiv;
                        if moves {
                            finished.remove(idx);
                            match veh.class {
                                VehicleClass::Car => self.veh_moved_car[i * offset + j] += 1,
                                VehicleClass::Truck => self.veh_moved_truck[i * offset + j] += 1,
                            }
                            moved.push(veh_id);
                        } else {
                            idx += 1;
                        }
                        to_move -= equiv;
                    } else {
                        idx += 1;
                    }
                }
                if to_move > FLOW_EPSILON {
                    return Err(SimulationError::Accounting {
                        tick,
                        link: *in_id,
                        reason: format!(
                            "{to_move} simulation vehicles of junction flow left after scanning the finished array"
                        ),
                    });
                }

                let out_link = links.get_mut(out_id).unwrap();
                for veh_id in moved {
                    vehicles.get_mut(veh_id).current_link = Some(*out_id);
                    out_link.core_mut().incoming.push_back(veh_id);
                }
            }
            // Break arrival-order bias before the downstream link samples a
            // subset within its supply.
            rnd.shuffle(&mut links.get_mut(out_id).unwrap().core_mut().incoming);
        }
        Ok(())
    }

    fn record_cumulative_curves(&self, links: &mut IntMap<LinkId, SimLink>, tick: u32) {
        let offset = self.out_links.len();
        for (j, out_id) in self.out_links.iter().enumerate() {
            let sum_car: u32 = (0..self.in_links.len())
                .map(|i| self.veh_moved_car[i * offset + j])
                .sum();
            let sum_truck: u32 = (0..self.in_links.len())
                .map(|i| self.veh_moved_truck[i * offset + j])
                .sum();
            links
                .get_mut(out_id)
                .unwrap()
                .core_mut()
                .record_in(tick + 1, sum_car, sum_truck);
        }
        for (i, in_id) in self.in_links.iter().enumerate() {
            let sum_car: u32 = (0..self.out_links.len())
                .map(|j| self.veh_moved_car[i * offset + j])
                .sum();
            let sum_truck: u32 = (0..self.out_links.len())
                .map(|j| self.veh_moved_truck[i * offset + j])
                .sum();
            links
                .get_mut(in_id)
                .unwrap()
                .core_mut()
                .record_out(tick + 1, sum_car, sum_truck);
        }
    }

    #[cfg(test)]
    pub(crate) fn flow(&self, i: usize, j: usize) -> f64 {
        self.veh_flow[i * self.out_links.len() + j]
    }
}

#[cfg(test)]
mod tests {
    use super::{JunctionNode, OriginNode, SimNode};
    use crate::simulation::network::ctm::CtmLink;
    use crate::simulation::network::curve::FlowDirection;
    use crate::simulation::network::link::SimLink;
    use crate::simulation::network::node::DestinationNode;
    use crate::simulation::network::{LinkId, LinkModel, LinkRecord, NodeId};
    use crate::simulation::random::SimRandom;
    use crate::simulation::vehicles::{VehicleClass, VehicleFactory, VehicleId};
    use assert_approx_eq::assert_approx_eq;
    use nohash_hasher::IntMap;
    use std::collections::VecDeque;

    fn link_record(id: u32, lane_flow_cap_car: f64) -> LinkRecord {
        LinkRecord {
            id: LinkId(id),
            from: NodeId(0),
            to: NodeId(1),
            model: LinkModel::Ctm,
            lanes: 1,
            length: 100.0,
            lane_hold_cap_car: 0.12,
            lane_hold_cap_truck: 0.1,
            lane_flow_cap_car,
            lane_flow_cap_truck: 0.4,
            ffs_car: 10.0,
            ffs_truck: 8.0,
            veh_convert_factor: 2.0,
        }
    }

    fn ctm_link(id: u32, lane_flow_cap_car: f64, flow_scalar: f64) -> SimLink {
        SimLink::Ctm(CtmLink::build(&link_record(id, lane_flow_cap_car), 10.0, flow_scalar).unwrap())
    }

    fn spawn(
        factory: &mut VehicleFactory,
        class: VehicleClass,
        next: Option<LinkId>,
    ) -> VehicleId {
        let id = factory.make_vehicle(class, 0, NodeId(0), NodeId(1));
        factory.get_mut(id).next_link = next;
        id
    }

    #[test]
    fn origin_release_is_clamped_by_link_supply() {
        // supply of the empty link is 0.3 veh/s * 10 s = 3 real vehicles
        let mut links: IntMap<LinkId, SimLink> = IntMap::default();
        links.insert(LinkId(1), ctm_link(1, 0.3, 1.0));
        links.get_mut(&LinkId(1)).unwrap().core_mut().install_curves();

        let mut factory = VehicleFactory::new();
        let mut node = OriginNode::new(NodeId(0), vec![LinkId(1)]);
        for _ in 0..10 {
            let veh = spawn(&mut factory, VehicleClass::Car, Some(LinkId(1)));
            node.in_veh_queue.push_back(veh);
        }

        let mut node = SimNode::Origin(node);
        let mut rnd = SimRandom::from_seed(1);
        node.evolve(&mut links, &mut factory, &mut rnd, 0).unwrap();

        let SimNode::Origin(origin) = &node else {
            unreachable!()
        };
        assert_eq!(7, origin.in_veh_queue.len());
        let link = links.get(&LinkId(1)).unwrap();
        assert_eq!(3, link.core().incoming.len());
        let n_in = link
            .core()
            .curve(VehicleClass::Car, FlowDirection::In)
            .unwrap();
        assert_approx_eq!(3.0, n_in.final_value());
        assert_eq!((1, 3.0), *n_in.records().last().unwrap());
    }

    #[test]
    fn origin_weighs_trucks_by_convert_factor() {
        // supply 4; two trucks cost 2 each
        let mut links: IntMap<LinkId, SimLink> = IntMap::default();
        links.insert(LinkId(1), ctm_link(1, 0.4, 1.0));

        let mut factory = VehicleFactory::new();
        let mut node = OriginNode::new(NodeId(0), vec![LinkId(1)]);
        for _ in 0..4 {
            let veh = spawn(&mut factory, VehicleClass::Truck, Some(LinkId(1)));
            node.in_veh_queue.push_back(veh);
        }

        let mut node = SimNode::Origin(node);
        let mut rnd = SimRandom::from_seed(1);
        node.evolve(&mut links, &mut factory, &mut rnd, 0).unwrap();

        let SimNode::Origin(origin) = &node else {
            unreachable!()
        };
        assert_eq!(2, origin.in_veh_queue.len());
        assert_eq!(2, links.get(&LinkId(1)).unwrap().core().incoming.len());
    }

    #[test]
    fn junction_shares_supply_by_demand() {
        let mut links: IntMap<LinkId, SimLink> = IntMap::default();
        links.insert(LinkId(1), ctm_link(1, 0.5, 1.0));
        links.insert(LinkId(2), ctm_link(2, 0.5, 1.0));
        links.insert(LinkId(3), ctm_link(3, 0.4, 1.0));

        let mut factory = VehicleFactory::new();
        for in_id in [1u32, 2] {
            for _ in 0..4 {
                let veh = spawn(&mut factory, VehicleClass::Car, Some(LinkId(3)));
                links
                    .get_mut(&LinkId(in_id))
                    .unwrap()
                    .core_mut()
                    .finished
                    .push_back(veh);
            }
        }

        let mut junction = JunctionNode::new(
            NodeId(5),
            vec![LinkId(1), LinkId(2)],
            vec![LinkId(3)],
            1.0,
        );
        let mut rnd = SimRandom::from_seed(3);
        junction
            .evolve(&mut links, &mut factory, &mut rnd, 0)
            .unwrap();

        // out supply 4 split evenly between equal demands of 4
        assert_approx_eq!(2.0, junction.flow(0, 0));
        assert_approx_eq!(2.0, junction.flow(1, 0));
        assert_eq!(4, links.get(&LinkId(3)).unwrap().core().incoming.len());
        assert_eq!(2, links.get(&LinkId(1)).unwrap().core().finished.len());
        assert_eq!(2, links.get(&LinkId(2)).unwrap().core().finished.len());
    }

    #[test]
    fn empty_junction_makes_no_moves_and_no_records() {
        let mut links: IntMap<LinkId, SimLink> = IntMap::default();
        links.insert(LinkId(1), ctm_link(1, 0.5, 1.0));
        links.insert(LinkId(2), ctm_link(2, 0.5, 1.0));
        for link in links.values_mut() {
            link.core_mut().install_curves();
        }

        let mut factory = VehicleFactory::new();
        let mut junction = JunctionNode::new(NodeId(5), vec![LinkId(1)], vec![LinkId(2)], 1.0);
        let mut rnd = SimRandom::from_seed(3);
        junction
            .evolve(&mut links, &mut factory, &mut rnd, 0)
            .unwrap();

        for link in links.values() {
            for class in [VehicleClass::Car, VehicleClass::Truck] {
                for direction in [FlowDirection::In, FlowDirection::Out] {
                    assert_eq!(1, link.core().curve(class, direction).unwrap().records().len());
                }
            }
        }
    }

    #[test]
    fn junction_rejects_vehicle_with_unknown_out_link() {
        let mut links: IntMap<LinkId, SimLink> = IntMap::default();
        links.insert(LinkId(1), ctm_link(1, 0.5, 1.0));
        links.insert(LinkId(2), ctm_link(2, 0.5, 1.0));

        let mut factory = VehicleFactory::new();
        let veh = spawn(&mut factory, VehicleClass::Car, Some(LinkId(77)));
        links
            .get_mut(&LinkId(1))
            .unwrap()
            .core_mut()
            .finished
            .push_back(veh);

        let mut junction = JunctionNode::new(NodeId(5), vec![LinkId(1)], vec![LinkId(2)], 1.0);
        let mut rnd = SimRandom::from_seed(3);
        let result = junction.evolve(&mut links, &mut factory, &mut rnd, 0);
        assert!(matches!(
            result,
            Err(crate::simulation::error::SimulationError::Routing { .. })
        ));
    }

    #[test]
    fn junction_rejects_vehicle_without_next_link() {
        let mut links: IntMap<LinkId, SimLink> = IntMap::default();
        links.insert(LinkId(1), ctm_link(1, 0.5, 1.0));
        links.insert(LinkId(2), ctm_link(2, 0.5, 1.0));
        links.get_mut(&LinkId(2)).unwrap().core_mut().install_curves();

        let mut factory = VehicleFactory::new();
        let veh = spawn(&mut factory, VehicleClass::Car, None);
        links
            .get_mut(&LinkId(1))
            .unwrap()
            .core_mut()
            .finished
            .push_back(veh);

        let mut junction = JunctionNode::new(NodeId(5), vec![LinkId(1)], vec![LinkId(2)], 1.0);
        let mut rnd = SimRandom::from_seed(3);
        let result = junction.evolve(&mut links, &mut factory, &mut rnd, 0);
        assert!(matches!(
            result,
            Err(crate::simulation::error::SimulationError::Routing { .. })
        ));
        // no counts were touched
        let curve = links
            .get(&LinkId(2))
            .unwrap()
            .core()
            .curve(VehicleClass::Car, FlowDirection::In)
            .unwrap();
        assert_eq!(1, curve.records().len());
    }

    #[test]
    fn fractional_move_probability_matches_budget() {
        // One truck candidate with convert factor 2 against a supply of 0.6
        // real vehicles: the move probability is 0.6 / 2 = 0.3.
        let mut links: IntMap<LinkId, SimLink> = IntMap::default();
        links.insert(LinkId(1), ctm_link(1, 0.5, 1.0));
        links.insert(LinkId(2), ctm_link(2, 0.06, 1.0));

        let mut factory = VehicleFactory::new();
        let veh = spawn(&mut factory, VehicleClass::Truck, Some(LinkId(2)));

        let mut junction = JunctionNode::new(NodeId(5), vec![LinkId(1)], vec![LinkId(2)], 1.0);
        let mut rnd = SimRandom::from_seed(12345);
        let trials = 10_000;
        let mut moves = 0;
        for tick in 0..trials {
            links
                .get_mut(&LinkId(1))
                .unwrap()
                .core_mut()
                .finished
                .push_back(veh);
            junction
                .evolve(&mut links, &mut factory, &mut rnd, tick)
                .unwrap();
            let out_incoming = &mut links.get_mut(&LinkId(2)).unwrap().core_mut().incoming;
            if out_incoming.pop_front().is_some() {
                moves += 1;
            } else {
                links.get_mut(&LinkId(1)).unwrap().core_mut().finished.clear();
            }
        }

        let rate = f64::from(moves) / f64::from(trials);
        // 3 sigma of a Bernoulli(0.3) over 10k trials
        let sigma = (0.3f64 * 0.7 / f64::from(trials)).sqrt();
        assert!(
            (rate - 0.3).abs() < 3.0 * sigma,
            "measured rate {rate} too far from 0.3"
        );
    }

    #[test]
    fn destination_drains_finished_and_records() {
        let mut links: IntMap<LinkId, SimLink> = IntMap::default();
        links.insert(LinkId(1), ctm_link(1, 0.5, 1.0));
        links.get_mut(&LinkId(1)).unwrap().core_mut().install_curves();

        let mut factory = VehicleFactory::new();
        for _ in 0..2 {
            let veh = spawn(&mut factory, VehicleClass::Car, None);
            links
                .get_mut(&LinkId(1))
                .unwrap()
                .core_mut()
                .finished
                .push_back(veh);
        }
        let veh = spawn(&mut factory, VehicleClass::Truck, None);
        links
            .get_mut(&LinkId(1))
            .unwrap()
            .core_mut()
            .finished
            .push_back(veh);

        let node = DestinationNode::new(NodeId(9), vec![LinkId(1)]);
        let mut rnd = SimRandom::from_seed(1);
        SimNode::Destination(node)
            .evolve(&mut links, &mut factory, &mut rnd, 4)
            .unwrap();

        let core = links.get(&LinkId(1)).unwrap().core();
        assert!(core.finished.is_empty());
        let n_out_car = core.curve(VehicleClass::Car, FlowDirection::Out).unwrap();
        assert_eq!(vec![(0, 0.0), (5, 2.0)], n_out_car.records().to_vec());
        let n_out_truck = core.curve(VehicleClass::Truck, FlowDirection::Out).unwrap();
        assert_approx_eq!(1.0, n_out_truck.final_value());
    }

    #[test]
    fn destination_rejects_vehicle_with_next_link() {
        let mut links: IntMap<LinkId, SimLink> = IntMap::default();
        links.insert(LinkId(1), ctm_link(1, 0.5, 1.0));

        let mut factory = VehicleFactory::new();
        let veh = spawn(&mut factory, VehicleClass::Car, Some(LinkId(2)));
        links
            .get_mut(&LinkId(1))
            .unwrap()
            .core_mut()
            .finished
            .push_back(veh);

        let node = DestinationNode::new(NodeId(9), vec![LinkId(1)]);
        let mut rnd = SimRandom::from_seed(1);
        let result =
            SimNode::Destination(node).evolve(&mut links, &mut factory, &mut rnd, 0);
        assert!(matches!(
            result,
            Err(crate::simulation::error::SimulationError::Routing { .. })
        ));
    }

    #[test]
    fn incoming_queue_is_shuffled_but_complete() {
        let mut links: IntMap<LinkId, SimLink> = IntMap::default();
        links.insert(LinkId(1), ctm_link(1, 0.5, 1.0));
        links.insert(LinkId(2), ctm_link(2, 0.5, 1.0));

        let mut factory = VehicleFactory::new();
        let mut expected: Vec<VehicleId> = Vec::new();
        for _ in 0..5 {
            let veh = spawn(&mut factory, VehicleClass::Car, Some(LinkId(2)));
            expected.push(veh);
            links
                .get_mut(&LinkId(1))
                .unwrap()
                .core_mut()
                .finished
                .push_back(veh);
        }

        let mut junction = JunctionNode::new(NodeId(5), vec![LinkId(1)], vec![LinkId(2)], 1.0);
        let mut rnd = SimRandom::from_seed(8);
        junction
            .evolve(&mut links, &mut factory, &mut rnd, 0)
            .unwrap();

        let incoming: &VecDeque<VehicleId> =
            &links.get(&LinkId(2)).unwrap().core().incoming;
        let mut got: Vec<VehicleId> = incoming.iter().copied().collect();
        got.sort();
        assert_eq!(expected, got);
    }
}
