use nohash_hasher::IntMap;
use tracing::warn;

use crate::simulation::config::SimulationConfig;
use crate::simulation::error::SimulationError;
use crate::simulation::network::ctm::CtmLink;
use crate::simulation::network::link::SimLink;
use crate::simulation::network::node::{DestinationNode, JunctionNode, OriginNode, SimNode};
use crate::simulation::network::pq::PqLink;
use crate::simulation::network::{LinkId, LinkModel, Network, NodeId, NodeKind};
use crate::simulation::random::SimRandom;
use crate::simulation::vehicles::VehicleFactory;

/// Runtime network: links and nodes built from the topology records.
/// Per-tick iteration orders are explicit so a seeded run is reproducible;
/// nodes evolve origins first, then junctions, then destinations.
#[derive(Debug)]
pub struct SimNetwork {
    pub links: IntMap<LinkId, SimLink>,
    pub nodes: IntMap<NodeId, SimNode>,
    node_order: Vec<NodeId>,
    link_order: Vec<LinkId>,
}

impl SimNetwork {
    pub fn from_network(
        network: &Network,
        config: &SimulationConfig,
    ) -> Result<Self, SimulationError> {
        let mut links: IntMap<LinkId, SimLink> = IntMap::default();
        let mut in_links: IntMap<NodeId, Vec<LinkId>> = IntMap::default();
        let mut out_links: IntMap<NodeId, Vec<LinkId>> = IntMap::default();

        let node_ids: IntMap<NodeId, NodeKind> =
            network.nodes.iter().map(|n| (n.id, n.kind)).collect();
        if node_ids.len() != network.nodes.len() {
            return Err(SimulationError::InvalidNetwork(
                "duplicate node ids".to_string(),
            ));
        }

        for record in &network.links {
            if !node_ids.contains_key(&record.from) || !node_ids.contains_key(&record.to) {
                return Err(SimulationError::InvalidNetwork(format!(
                    "link {:?} references unknown nodes",
                    record.id
                )));
            }
            let link = match record.model {
                LinkModel::Ctm => {
                    SimLink::Ctm(CtmLink::build(record, config.unit_time, config.flow_scalar)?)
                }
                LinkModel::Pq => {
                    SimLink::Pq(PqLink::build(record, config.unit_time, config.flow_scalar)?)
                }
            };
            if links.insert(record.id, link).is_some() {
                return Err(SimulationError::InvalidNetwork(format!(
                    "duplicate link id {:?}",
                    record.id
                )));
            }
            out_links.entry(record.from).or_default().push(record.id);
            in_links.entry(record.to).or_default().push(record.id);
        }

        let mut nodes: IntMap<NodeId, SimNode> = IntMap::default();
        let mut origin_order = Vec::new();
        let mut junction_order = Vec::new();
        let mut destination_order = Vec::new();
        for record in &network.nodes {
            let incoming = in_links.remove(&record.id).unwrap_or_default();
            let outgoing = out_links.remove(&record.id).unwrap_or_default();
            let node = match record.kind {
                NodeKind::Origin => {
                    if !incoming.is_empty() {
                        warn!(
                            node = record.id.0,
                            "origin node has incoming links, their vehicles will never drain"
                        );
                    }
                    origin_order.push(record.id);
                    SimNode::Origin(OriginNode::new(record.id, outgoing))
                }
                NodeKind::Destination => {
                    destination_order.push(record.id);
                    SimNode::Destination(DestinationNode::new(record.id, incoming))
                }
                NodeKind::Junction => {
                    junction_order.push(record.id);
                    SimNode::Junction(JunctionNode::new(
                        record.id,
                        incoming,
                        outgoing,
                        config.flow_scalar,
                    ))
                }
            };
            nodes.insert(record.id, node);
        }

        let mut node_order = origin_order;
        node_order.append(&mut junction_order);
        node_order.append(&mut destination_order);
        let link_order = network.links.iter().map(|l| l.id).collect();

        Ok(SimNetwork {
            links,
            nodes,
            node_order,
            link_order,
        })
    }

    /// Node phase of a tick: every node apportions and moves vehicles between
    /// the finished arrays of its in-links and the incoming arrays of its
    /// out-links.
    pub fn move_nodes(
        &mut self,
        vehicles: &mut VehicleFactory,
        rnd: &mut SimRandom,
        now: u32,
    ) -> Result<(), SimulationError> {
        for node_id in &self.node_order {
            let node = self.nodes.get_mut(node_id).unwrap();
            node.evolve(&mut self.links, vehicles, rnd, now)?;
        }
        Ok(())
    }

    /// Link phase of a tick: every link absorbs its incoming array and
    /// advances its internal dynamics.
    pub fn move_links(
        &mut self,
        vehicles: &VehicleFactory,
        rnd: &mut SimRandom,
        now: u32,
    ) -> Result<(), SimulationError> {
        for link_id in &self.link_order {
            let link = self.links.get_mut(link_id).unwrap();
            link.clear_incoming(vehicles, now)?;
            link.evolve(vehicles, rnd, now)?;
        }
        Ok(())
    }

    pub fn link_ids(&self) -> &[LinkId] {
        &self.link_order
    }

    pub fn get_link(&self, id: LinkId) -> Option<&SimLink> {
        self.links.get(&id)
    }

    pub fn get_link_mut(&mut self, id: LinkId) -> Option<&mut SimLink> {
        self.links.get_mut(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::SimNetwork;
    use crate::simulation::config::SimulationConfig;
    use crate::simulation::network::link::SimLink;
    use crate::simulation::network::node::SimNode;
    use crate::simulation::network::{
        LinkId, LinkModel, LinkRecord, Network, NodeId, NodeKind, NodeRecord,
    };

    fn config() -> SimulationConfig {
        SimulationConfig {
            unit_time: 10.0,
            flow_scalar: 1.0,
            assign_frequency: 10,
            start_assign_interval: 0,
            max_assign_interval: 1,
            seed: 42,
        }
    }

    fn link(id: u32, from: u32, to: u32, model: LinkModel) -> LinkRecord {
        LinkRecord {
            id: LinkId(id),
            from: NodeId(from),
            to: NodeId(to),
            model,
            lanes: 1,
            length: 200.0,
            lane_hold_cap_car: 0.12,
            lane_hold_cap_truck: 0.1,
            lane_flow_cap_car: 0.5,
            lane_flow_cap_truck: 0.4,
            ffs_car: 10.0,
            ffs_truck: 8.0,
            veh_convert_factor: 2.0,
        }
    }

    fn corridor() -> Network {
        let mut network = Network::new();
        network.add_node(NodeRecord {
            id: NodeId(0),
            kind: NodeKind::Origin,
        });
        network.add_node(NodeRecord {
            id: NodeId(1),
            kind: NodeKind::Junction,
        });
        network.add_node(NodeRecord {
            id: NodeId(2),
            kind: NodeKind::Destination,
        });
        network.add_link(link(1, 0, 1, LinkModel::Pq));
        network.add_link(link(2, 1, 2, LinkModel::Ctm));
        network
    }

    #[test]
    fn builds_typed_nodes_and_links() {
        let net = SimNetwork::from_network(&corridor(), &config()).unwrap();
        assert!(matches!(net.get_link(LinkId(1)), Some(SimLink::Pq(_))));
        assert!(matches!(net.get_link(LinkId(2)), Some(SimLink::Ctm(_))));
        assert!(matches!(
            net.nodes.get(&NodeId(0)),
            Some(SimNode::Origin(_))
        ));
        assert!(matches!(
            net.nodes.get(&NodeId(1)),
            Some(SimNode::Junction(_))
        ));
        assert!(matches!(
            net.nodes.get(&NodeId(2)),
            Some(SimNode::Destination(_))
        ));
    }

    #[test]
    fn junction_arrays_follow_declaration_order() {
        let net = SimNetwork::from_network(&corridor(), &config()).unwrap();
        let Some(SimNode::Junction(junction)) = net.nodes.get(&NodeId(1)) else {
            panic!("expected junction");
        };
        assert_eq!(vec![LinkId(1)], junction.in_links);
        assert_eq!(vec![LinkId(2)], junction.out_links);
    }

    #[test]
    fn rejects_dangling_link() {
        let mut network = corridor();
        network.add_link(link(3, 1, 99, LinkModel::Ctm));
        assert!(SimNetwork::from_network(&network, &config()).is_err());
    }

    #[test]
    fn rejects_duplicate_link_ids() {
        let mut network = corridor();
        network.add_link(link(2, 0, 1, LinkModel::Ctm));
        assert!(SimNetwork::from_network(&network, &config()).is_err());
    }
}
