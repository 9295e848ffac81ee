use nohash_hasher::IntMap;

use crate::simulation::network::{LinkId, NodeId};
use crate::simulation::vehicles::Vehicle;

/// The core consumes routing as an oracle: given a vehicle and its current
/// location, return the link it should take next, or `None` once the current
/// link delivers it to its destination. The oracle is queried for vehicles
/// waiting at their origin (`current_link == None`) and for vehicles in a
/// link's finished array; vehicles deeper inside a link keep the stale
/// next-link assigned when they crossed the previous node.
pub trait RoutingOracle {
    fn next_link(&self, vehicle: &Vehicle, current_link: Option<LinkId>) -> Option<LinkId>;
}

/// Fixed-path routing: one precomputed link sequence per OD pair. Stands in
/// for an external routing table in tests and demo scenarios.
#[derive(Debug, Default)]
pub struct FixedRouting {
    /// origin -> destination -> first link
    first_links: IntMap<NodeId, IntMap<NodeId, LinkId>>,
    /// link -> destination -> successor link (None once the path ends)
    next_links: IntMap<LinkId, IntMap<NodeId, Option<LinkId>>>,
}

impl FixedRouting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the path for one OD pair. Later links of earlier paths are
    /// overwritten if two paths to the same destination disagree.
    pub fn add_path(&mut self, origin: NodeId, destination: NodeId, links: &[LinkId]) {
        let Some(first) = links.first() else {
            return;
        };
        self.first_links
            .entry(origin)
            .or_default()
            .insert(destination, *first);
        for pair in links.windows(2) {
            self.next_links
                .entry(pair[0])
                .or_default()
                .insert(destination, Some(pair[1]));
        }
        self.next_links
            .entry(*links.last().unwrap())
            .or_default()
            .insert(destination, None);
    }
}

impl RoutingOracle for FixedRouting {
    fn next_link(&self, vehicle: &Vehicle, current_link: Option<LinkId>) -> Option<LinkId> {
        match current_link {
            None => self
                .first_links
                .get(&vehicle.origin)
                .and_then(|by_dest| by_dest.get(&vehicle.destination))
                .copied(),
            Some(link) => self
                .next_links
                .get(&link)
                .and_then(|by_dest| by_dest.get(&vehicle.destination))
                .copied()
                .flatten(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FixedRouting, RoutingOracle};
    use crate::simulation::network::{LinkId, NodeId};
    use crate::simulation::vehicles::{VehicleClass, VehicleFactory};

    #[test]
    fn walks_registered_path() {
        let mut routing = FixedRouting::new();
        routing.add_path(NodeId(0), NodeId(3), &[LinkId(1), LinkId(2)]);

        let mut factory = VehicleFactory::new();
        let veh = factory.make_vehicle(VehicleClass::Car, 0, NodeId(0), NodeId(3));
        let veh = factory.get(veh);

        assert_eq!(Some(LinkId(1)), routing.next_link(veh, None));
        assert_eq!(Some(LinkId(2)), routing.next_link(veh, Some(LinkId(1))));
        assert_eq!(None, routing.next_link(veh, Some(LinkId(2))));
    }

    #[test]
    fn distinguishes_destinations_on_shared_links() {
        let mut routing = FixedRouting::new();
        routing.add_path(NodeId(0), NodeId(3), &[LinkId(1), LinkId(2)]);
        routing.add_path(NodeId(0), NodeId(4), &[LinkId(1), LinkId(5)]);

        let mut factory = VehicleFactory::new();
        let to_3 = factory.make_vehicle(VehicleClass::Car, 0, NodeId(0), NodeId(3));
        let to_4 = factory.make_vehicle(VehicleClass::Car, 0, NodeId(0), NodeId(4));

        assert_eq!(
            Some(LinkId(2)),
            routing.next_link(factory.get(to_3), Some(LinkId(1)))
        );
        assert_eq!(
            Some(LinkId(5)),
            routing.next_link(factory.get(to_4), Some(LinkId(1)))
        );
    }
}
