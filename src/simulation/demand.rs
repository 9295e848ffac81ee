use nohash_hasher::IntMap;
use serde::{Deserialize, Serialize};

use crate::simulation::error::SimulationError;
use crate::simulation::network::node::SimNode;
use crate::simulation::network::NodeId;
use crate::simulation::vehicles::{VehicleClass, VehicleFactory};

/// Demand of one OD pair: real-world vehicles per class and assignment
/// interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdDemand {
    pub origin: NodeId,
    pub destination: NodeId,
    pub car: Vec<f64>,
    pub truck: Vec<f64>,
}

/// Origin: owns the per-destination demand vectors and releases vehicles on
/// the assignment schedule.
#[derive(Debug)]
pub struct Origin {
    pub node: NodeId,
    current_assign_interval: u32,
    max_assign_interval: u32,
    frequency: u32,
    flow_scalar: f64,
    demand: Vec<OdDemand>,
}

impl Origin {
    pub fn new(
        node: NodeId,
        current_assign_interval: u32,
        max_assign_interval: u32,
        frequency: u32,
        flow_scalar: f64,
    ) -> Self {
        Origin {
            node,
            current_assign_interval,
            max_assign_interval,
            frequency,
            flow_scalar,
            demand: Vec::new(),
        }
    }

    pub fn add_demand(&mut self, demand: OdDemand) -> Result<(), SimulationError> {
        let intervals = self.max_assign_interval as usize;
        if demand.car.len() < intervals || demand.truck.len() < intervals {
            return Err(SimulationError::InvalidConfig(format!(
                "demand from {:?} to {:?} covers fewer than {} assignment intervals",
                demand.origin, demand.destination, intervals
            )));
        }
        self.demand.push(demand);
        Ok(())
    }

    pub fn assignment_exhausted(&self) -> bool {
        self.current_assign_interval >= self.max_assign_interval
    }

    /// Creates this interval's vehicles and puts them into the origin node's
    /// queue: all cars per destination first, then all trucks, in
    /// demand-record order.
    pub fn release(
        &mut self,
        factory: &mut VehicleFactory,
        nodes: &mut IntMap<NodeId, SimNode>,
        tick: u32,
    ) {
        if self.assignment_exhausted() || tick % self.frequency != 0 {
            return;
        }
        let interval = self.current_assign_interval as usize;
        let Some(SimNode::Origin(node)) = nodes.get_mut(&self.node) else {
            panic!("origin {:?} is not backed by an origin node", self.node)
        };

        for od in &self.demand {
            let to_release = (od.car[interval] * self.flow_scalar).round() as u32;
            for _ in 0..to_release {
                let veh =
                    factory.make_vehicle(VehicleClass::Car, tick, self.node, od.destination);
                node.in_veh_queue.push_back(veh);
            }
        }
        for od in &self.demand {
            let to_release = (od.truck[interval] * self.flow_scalar).round() as u32;
            for _ in 0..to_release {
                let veh =
                    factory.make_vehicle(VehicleClass::Truck, tick, self.node, od.destination);
                node.in_veh_queue.push_back(veh);
            }
        }
        self.current_assign_interval += 1;
    }
}

/// Destination: receives vehicles collected by its destination node and
/// stamps their finish time.
#[derive(Debug)]
pub struct Destination {
    pub node: NodeId,
}

impl Destination {
    pub fn new(node: NodeId) -> Self {
        Destination { node }
    }

    pub fn receive(
        &self,
        factory: &mut VehicleFactory,
        nodes: &mut IntMap<NodeId, SimNode>,
        tick: u32,
    ) -> Result<(), SimulationError> {
        let Some(SimNode::Destination(node)) = nodes.get_mut(&self.node) else {
            panic!("destination {:?} is not backed by a destination node", self.node)
        };
        while let Some(veh_id) = node.out_veh_queue.pop_front() {
            let veh = factory.get_mut(veh_id);
            if veh.destination != self.node {
                return Err(SimulationError::Routing {
                    tick,
                    node: Some(self.node),
                    reason: format!(
                        "vehicle {:?} bound for {:?} was delivered to {:?}",
                        veh_id, veh.destination, self.node
                    ),
                });
            }
            veh.finish_time = Some(tick);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Destination, OdDemand, Origin};
    use crate::simulation::network::node::{DestinationNode, OriginNode, SimNode};
    use crate::simulation::network::NodeId;
    use crate::simulation::vehicles::{VehicleClass, VehicleFactory};
    use nohash_hasher::IntMap;

    fn origin_with_node() -> (Origin, IntMap<NodeId, SimNode>) {
        let mut origin = Origin::new(NodeId(0), 0, 2, 10, 2.0);
        origin
            .add_demand(OdDemand {
                origin: NodeId(0),
                destination: NodeId(5),
                car: vec![2.0, 1.0],
                truck: vec![1.0, 0.0],
            })
            .unwrap();
        let mut nodes: IntMap<NodeId, SimNode> = IntMap::default();
        nodes.insert(
            NodeId(0),
            SimNode::Origin(OriginNode::new(NodeId(0), vec![])),
        );
        (origin, nodes)
    }

    #[test]
    fn releases_scaled_vehicles_on_schedule() {
        let (mut origin, mut nodes) = origin_with_node();
        let mut factory = VehicleFactory::new();

        origin.release(&mut factory, &mut nodes, 0);
        // 2 cars and 1 truck, amplified by flow_scalar 2
        let SimNode::Origin(node) = nodes.get(&NodeId(0)).unwrap() else {
            unreachable!()
        };
        assert_eq!(6, node.in_veh_queue.len());
        let cars = node
            .in_veh_queue
            .iter()
            .filter(|id| factory.get(**id).class == VehicleClass::Car)
            .count();
        assert_eq!(4, cars);
    }

    #[test]
    fn releases_only_on_frequency_ticks() {
        let (mut origin, mut nodes) = origin_with_node();
        let mut factory = VehicleFactory::new();

        origin.release(&mut factory, &mut nodes, 3);
        let SimNode::Origin(node) = nodes.get(&NodeId(0)).unwrap() else {
            unreachable!()
        };
        assert!(node.in_veh_queue.is_empty());
    }

    #[test]
    fn stops_after_last_interval() {
        let (mut origin, mut nodes) = origin_with_node();
        let mut factory = VehicleFactory::new();

        origin.release(&mut factory, &mut nodes, 0);
        origin.release(&mut factory, &mut nodes, 10);
        assert!(origin.assignment_exhausted());
        let before = factory.len();
        origin.release(&mut factory, &mut nodes, 20);
        assert_eq!(before, factory.len());
    }

    #[test]
    fn short_demand_vector_is_rejected() {
        let mut origin = Origin::new(NodeId(0), 0, 4, 10, 1.0);
        let result = origin.add_demand(OdDemand {
            origin: NodeId(0),
            destination: NodeId(5),
            car: vec![1.0],
            truck: vec![1.0],
        });
        assert!(result.is_err());
    }

    #[test]
    fn receive_stamps_finish_time() {
        let mut factory = VehicleFactory::new();
        let veh = factory.make_vehicle(VehicleClass::Car, 0, NodeId(0), NodeId(5));
        let mut nodes: IntMap<NodeId, SimNode> = IntMap::default();
        let mut node = DestinationNode::new(NodeId(5), vec![]);
        node.out_veh_queue.push_back(veh);
        nodes.insert(NodeId(5), SimNode::Destination(node));

        let destination = Destination::new(NodeId(5));
        destination.receive(&mut factory, &mut nodes, 7).unwrap();
        assert_eq!(Some(7), factory.get(veh).finish_time);
    }

    #[test]
    fn receive_rejects_misdelivered_vehicle() {
        let mut factory = VehicleFactory::new();
        let veh = factory.make_vehicle(VehicleClass::Car, 0, NodeId(0), NodeId(6));
        let mut nodes: IntMap<NodeId, SimNode> = IntMap::default();
        let mut node = DestinationNode::new(NodeId(5), vec![]);
        node.out_veh_queue.push_back(veh);
        nodes.insert(NodeId(5), SimNode::Destination(node));

        let destination = Destination::new(NodeId(5));
        assert!(destination.receive(&mut factory, &mut nodes, 7).is_err());
    }
}
