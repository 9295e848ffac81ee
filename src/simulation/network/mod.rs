pub mod ctm;
pub mod curve;
pub mod link;
pub mod node;
pub mod pq;
pub mod sim_network;

use nohash_hasher::IsEnabled;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u32);

impl IsEnabled for LinkId {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl IsEnabled for NodeId {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkModel {
    /// Multiclass cell transmission model with in-link congestion dynamics.
    Ctm,
    /// Point queue with fixed free-flow delay.
    Pq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Origin,
    Destination,
    Junction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub kind: NodeKind,
}

/// Static description of one directed link. All `lane_*` parameters are per
/// lane; the builder scales them by `lanes`. Speeds are m/s, densities veh/m,
/// flow capacities veh/s, length m.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: LinkId,
    pub from: NodeId,
    pub to: NodeId,
    pub model: LinkModel,
    pub lanes: u32,
    pub length: f64,
    pub lane_hold_cap_car: f64,
    pub lane_hold_cap_truck: f64,
    pub lane_flow_cap_car: f64,
    pub lane_flow_cap_truck: f64,
    pub ffs_car: f64,
    pub ffs_truck: f64,
    pub veh_convert_factor: f64,
}

/// Network topology as handed to the simulation builder. Node and link order
/// is meaningful: it fixes the scanning order of node in/out arrays and the
/// per-tick link evolution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    pub nodes: Vec<NodeRecord>,
    pub links: Vec<LinkRecord>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeRecord) {
        self.nodes.push(node);
    }

    pub fn add_link(&mut self, link: LinkRecord) {
        self.links.push(link);
    }
}
