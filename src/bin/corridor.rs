use anyhow::Result;
use clap::Parser;
use rust_dta::simulation::config::{ScenarioConfig, SimulationConfig};
use rust_dta::simulation::demand::OdDemand;
use rust_dta::simulation::engine::Simulation;
use rust_dta::simulation::logging::init_std_out_logging;
use rust_dta::simulation::network::curve::FlowDirection;
use rust_dta::simulation::network::{
    LinkId, LinkModel, LinkRecord, Network, NodeId, NodeKind, NodeRecord,
};
use rust_dta::simulation::routing::FixedRouting;
use rust_dta::simulation::vehicles::VehicleClass;
use std::path::PathBuf;
use tracing::info;

/// Runs a three-link corridor (origin connector, CTM main segment, CTM exit
/// segment) and prints the cumulative count curves of the main segment.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct CommandLineArgs {
    /// Optional YAML file with a `simulation:` section; built-in defaults
    /// otherwise.
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Real-world cars per assignment interval.
    #[arg(long, default_value_t = 40.0)]
    cars: f64,
    /// Real-world trucks per assignment interval.
    #[arg(long, default_value_t = 8.0)]
    trucks: f64,
    #[arg(long, default_value_t = 4711)]
    seed: u64,
    /// Abort if the corridor has not drained after this many ticks.
    #[arg(long, default_value_t = 10_000)]
    max_ticks: u32,
}

fn main() -> Result<()> {
    let _guard = init_std_out_logging();

    let args = CommandLineArgs::parse();
    info!("Started with args: {:?}", args);

    let mut config = match &args.config {
        Some(path) => ScenarioConfig::from_yaml_file(path)?.simulation,
        None => SimulationConfig {
            unit_time: 5.0,
            flow_scalar: 2.0,
            assign_frequency: 60,
            start_assign_interval: 0,
            max_assign_interval: 4,
            seed: args.seed,
        },
    };
    config.seed = args.seed;

    let network = corridor_network();
    let demand = vec![OdDemand {
        origin: NodeId(0),
        destination: NodeId(3),
        car: vec![args.cars; config.max_assign_interval as usize],
        truck: vec![args.trucks; config.max_assign_interval as usize],
    }];
    let mut routing = FixedRouting::new();
    routing.add_path(NodeId(0), NodeId(3), &[LinkId(1), LinkId(2), LinkId(3)]);

    let mut simulation = Simulation::build(config, &network, demand, Box::new(routing))?;
    for link in [LinkId(1), LinkId(2), LinkId(3)] {
        simulation.install_cumulative_curves(link)?;
    }

    let final_tick = simulation.run_to_completion(args.max_ticks)?;
    info!(
        final_tick,
        vehicles = simulation.vehicles().len(),
        "corridor drained"
    );

    for (class, direction, label) in [
        (VehicleClass::Car, FlowDirection::In, "N_in_car"),
        (VehicleClass::Car, FlowDirection::Out, "N_out_car"),
        (VehicleClass::Truck, FlowDirection::In, "N_in_truck"),
        (VehicleClass::Truck, FlowDirection::Out, "N_out_truck"),
    ] {
        let records = simulation.cumulative_curve(LinkId(2), class, direction)?;
        info!("{label}: {records:?}");
    }
    Ok(())
}

fn corridor_network() -> Network {
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
        kind: NodeKind::Junction,
    });
    network.add_node(NodeRecord {
        id: NodeId(3),
        kind: NodeKind::Destination,
    });
    // origin connector: point queue, effectively uncongested
    network.add_link(LinkRecord {
        id: LinkId(1),
        from: NodeId(0),
        to: NodeId(1),
        model: LinkModel::Pq,
        lanes: 2,
        length: 100.0,
        lane_hold_cap_car: 0.12,
        lane_hold_cap_truck: 0.1,
        lane_flow_cap_car: 0.6,
        lane_flow_cap_truck: 0.5,
        ffs_car: 20.0,
        ffs_truck: 16.0,
        veh_convert_factor: 2.0,
    });
    // main segment; the low flow capacity keeps the rounded cell flux of a
    // lone simulation vehicle at one, so the tail of the demand drains
    network.add_link(LinkRecord {
        id: LinkId(2),
        from: NodeId(1),
        to: NodeId(2),
        model: LinkModel::Ctm,
        lanes: 1,
        length: 500.0,
        lane_hold_cap_car: 0.12,
        lane_hold_cap_truck: 0.1,
        lane_flow_cap_car: 0.1,
        lane_flow_cap_truck: 0.08,
        ffs_car: 20.0,
        ffs_truck: 16.0,
        veh_convert_factor: 2.0,
    });
    // exit segment
    network.add_link(LinkRecord {
        id: LinkId(3),
        from: NodeId(2),
        to: NodeId(3),
        model: LinkModel::Ctm,
        lanes: 1,
        length: 300.0,
        lane_hold_cap_car: 0.12,
        lane_hold_cap_truck: 0.1,
        lane_flow_cap_car: 0.1,
        lane_flow_cap_truck: 0.08,
        ffs_car: 20.0,
        ffs_truck: 16.0,
        veh_convert_factor: 2.0,
    });
    network
}
