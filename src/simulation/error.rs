use thiserror::Error;

use crate::simulation::network::{LinkId, NodeId};

/// Fatal simulation errors. Construction errors are raised while building the
/// simulation, the remaining variants abort the tick in which they occur.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid parameters for link {link:?}: {reason}")]
    InvalidLinkParameter { link: LinkId, reason: String },
    #[error("invalid network: {0}")]
    InvalidNetwork(String),
    #[error("routing error at tick {tick} near node {node:?}: {reason}")]
    Routing {
        tick: u32,
        node: Option<NodeId>,
        reason: String,
    },
    #[error("accounting error at tick {tick} on link {link:?}: {reason}")]
    Accounting {
        tick: u32,
        link: LinkId,
        reason: String,
    },
    #[error("simulation made no progress for {0} ticks and was aborted")]
    Gridlock(u32),
}

/// Non-fatal errors returned by result queries. The simulation state is left
/// untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("link {0:?} is not part of the network")]
    UnknownLink(LinkId),
    #[error("cumulative curves were never installed on link {0:?}")]
    CurveNotInstalled(LinkId),
    #[error("tick {tick} is beyond the current loading interval {current}")]
    TickOutOfRange { tick: u32, current: u32 },
}
