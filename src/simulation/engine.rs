use tracing::info;

use crate::simulation::config::SimulationConfig;
use crate::simulation::demand::{Destination, OdDemand, Origin};
use crate::simulation::error::{QueryError, SimulationError};
use crate::simulation::network::curve::FlowDirection;
use crate::simulation::network::node::SimNode;
use crate::simulation::network::sim_network::SimNetwork;
use crate::simulation::network::{LinkId, Network, NodeKind};
use crate::simulation::random::SimRandom;
use crate::simulation::routing::RoutingOracle;
use crate::simulation::vehicles::{Vehicle, VehicleClass, VehicleFactory, VehicleId};

/// The simulation driver. One `step_once` advances the whole network by one
/// tick: origins release scheduled vehicles, the routing oracle refreshes
/// next-links, nodes move vehicles between links, links evolve their internal
/// dynamics, destinations receive arrived vehicles.
pub struct Simulation {
    config: SimulationConfig,
    network: SimNetwork,
    origins: Vec<Origin>,
    destinations: Vec<Destination>,
    vehicles: VehicleFactory,
    routing: Box<dyn RoutingOracle>,
    rnd: SimRandom,
    current_tick: u32,
}

impl Simulation {
    pub fn build(
        config: SimulationConfig,
        network: &Network,
        demands: Vec<OdDemand>,
        routing: Box<dyn RoutingOracle>,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let sim_network = SimNetwork::from_network(network, &config)?;

        let mut origins = Vec::new();
        let mut destinations = Vec::new();
        for record in &network.nodes {
            match record.kind {
                NodeKind::Origin => origins.push(Origin::new(
                    record.id,
                    config.start_assign_interval,
                    config.max_assign_interval,
                    config.assign_frequency,
                    config.flow_scalar,
                )),
                NodeKind::Destination => destinations.push(Destination::new(record.id)),
                NodeKind::Junction => {}
            }
        }

        for od in demands {
            if !destinations.iter().any(|d| d.node == od.destination) {
                return Err(SimulationError::InvalidNetwork(format!(
                    "demand targets {:?} which is not a destination node",
                    od.destination
                )));
            }
            let origin = origins
                .iter_mut()
                .find(|o| o.node == od.origin)
                .ok_or_else(|| {
                    SimulationError::InvalidNetwork(format!(
                        "demand starts at {:?} which is not an origin node",
                        od.origin
                    ))
                })?;
            origin.add_demand(od)?;
        }

        let rnd = SimRandom::from_seed(config.seed);
        Ok(Simulation {
            config,
            network: sim_network,
            origins,
            destinations,
            vehicles: VehicleFactory::new(),
            routing,
            rnd,
            current_tick: 0,
        })
    }

    pub fn step_once(&mut self) -> Result<(), SimulationError> {
        let now = self.current_tick;

        for origin in &mut self.origins {
            origin.release(&mut self.vehicles, &mut self.network.nodes, now);
        }

        self.update_routing();

        self.network
            .move_nodes(&mut self.vehicles, &mut self.rnd, now)?;
        self.network
            .move_links(&self.vehicles, &mut self.rnd, now)?;

        for destination in &self.destinations {
            destination.receive(&mut self.vehicles, &mut self.network.nodes, now)?;
        }

        self.current_tick += 1;
        Ok(())
    }

    /// Runs until all assignment intervals are exhausted and every vehicle
    /// has been received, or fails once `max_ticks` is reached.
    pub fn run_to_completion(&mut self, max_ticks: u32) -> Result<u32, SimulationError> {
        while !self.is_finished() {
            if self.current_tick >= max_ticks {
                return Err(SimulationError::Gridlock(max_ticks));
            }
            self.step_once()?;
        }
        info!(
            ticks = self.current_tick,
            vehicles = self.vehicles.len(),
            "simulation finished"
        );
        Ok(self.current_tick)
    }

    pub fn run_until(&mut self, tick: u32) -> Result<(), SimulationError> {
        while self.current_tick < tick {
            self.step_once()?;
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.origins.iter().all(Origin::assignment_exhausted)
            && self.vehicles.en_route_count() == 0
    }

    /// Refreshes next-links through the routing oracle: vehicles waiting at
    /// an origin get their first link, vehicles in a finished array get the
    /// successor of their current link (or none, which marks arrival).
    fn update_routing(&mut self) {
        for origin in &self.origins {
            let Some(SimNode::Origin(node)) = self.network.nodes.get(&origin.node) else {
                continue;
            };
            let waiting: Vec<VehicleId> = node.in_veh_queue.iter().copied().collect();
            for veh_id in waiting {
                let next = self.routing.next_link(self.vehicles.get(veh_id), None);
                self.vehicles.get_mut(veh_id).next_link = next;
            }
        }

        for link_id in self.network.link_ids().to_vec() {
            let finished: Vec<VehicleId> = self
                .network
                .get_link(link_id)
                .unwrap()
                .core()
                .finished
                .iter()
                .copied()
                .collect();
            for veh_id in finished {
                let next = self
                    .routing
                    .next_link(self.vehicles.get(veh_id), Some(link_id));
                self.vehicles.get_mut(veh_id).next_link = next;
            }
        }
    }

    pub fn current_tick(&self) -> u32 {
        self.current_tick
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        if (id.0 as usize) < self.vehicles.len() {
            Some(self.vehicles.get(id))
        } else {
            None
        }
    }

    pub fn vehicles(&self) -> &VehicleFactory {
        &self.vehicles
    }

    pub fn install_cumulative_curves(&mut self, link: LinkId) -> Result<(), QueryError> {
        let link = self
            .network
            .get_link_mut(link)
            .ok_or(QueryError::UnknownLink(link))?;
        link.core_mut().install_curves();
        Ok(())
    }

    /// The recorded (tick, cumulative real-world vehicles) pairs of one
    /// curve.
    pub fn cumulative_curve(
        &self,
        link: LinkId,
        class: VehicleClass,
        direction: FlowDirection,
    ) -> Result<&[(u32, f64)], QueryError> {
        let sim_link = self
            .network
            .get_link(link)
            .ok_or(QueryError::UnknownLink(link))?;
        let curve = sim_link
            .core()
            .curve(class, direction)
            .ok_or(QueryError::CurveNotInstalled(link))?;
        Ok(curve.records())
    }

    /// Curve value at a given tick; querying past the current loading
    /// interval is an error.
    pub fn cumulative_count_at(
        &self,
        link: LinkId,
        class: VehicleClass,
        direction: FlowDirection,
        tick: u32,
    ) -> Result<f64, QueryError> {
        if tick > self.current_tick {
            return Err(QueryError::TickOutOfRange {
                tick,
                current: self.current_tick,
            });
        }
        let sim_link = self
            .network
            .get_link(link)
            .ok_or(QueryError::UnknownLink(link))?;
        let curve = sim_link
            .core()
            .curve(class, direction)
            .ok_or(QueryError::CurveNotInstalled(link))?;
        Ok(curve.value_at(tick))
    }

    /// Current real-world (car, truck) volumes of a link.
    pub fn link_volume(&self, link: LinkId) -> Result<(f64, f64), QueryError> {
        let sim_link = self
            .network
            .get_link(link)
            .ok_or(QueryError::UnknownLink(link))?;
        Ok(sim_link.volumes(&self.vehicles))
    }
}
