use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::simulation::error::SimulationError;

/// Core loading parameters. One tick advances the network by `unit_time`
/// seconds; demand is specified per assignment interval of `assign_frequency`
/// ticks. `flow_scalar` is the simulation-vehicle amplification: one
/// real-world vehicle is represented by `flow_scalar` simulation vehicles.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub unit_time: f64,
    pub flow_scalar: f64,
    pub assign_frequency: u32,
    #[serde(default)]
    pub start_assign_interval: u32,
    pub max_assign_interval: u32,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    4711
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.unit_time <= 0.0 {
            return Err(SimulationError::InvalidConfig(format!(
                "unit_time must be positive, got {}",
                self.unit_time
            )));
        }
        if self.flow_scalar < 1.0 {
            return Err(SimulationError::InvalidConfig(format!(
                "flow_scalar must be at least 1, got {}",
                self.flow_scalar
            )));
        }
        if self.assign_frequency == 0 {
            return Err(SimulationError::InvalidConfig(
                "assign_frequency must be at least 1 tick".to_string(),
            ));
        }
        if self.start_assign_interval > self.max_assign_interval {
            return Err(SimulationError::InvalidConfig(format!(
                "start_assign_interval {} exceeds max_assign_interval {}",
                self.start_assign_interval, self.max_assign_interval
            )));
        }
        Ok(())
    }
}

/// Top level of a YAML scenario file. Only the simulation section is owned by
/// the core; network and demand records are handed to the builder by the
/// caller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    pub simulation: SimulationConfig,
}

impl ScenarioConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self, SimulationError> {
        let file = File::open(path).map_err(|e| {
            SimulationError::InvalidConfig(format!("failed to open {path:?}: {e}"))
        })?;
        let config: ScenarioConfig =
            serde_yaml::from_reader(BufReader::new(file)).map_err(|e| {
                SimulationError::InvalidConfig(format!("failed to parse {path:?}: {e}"))
            })?;
        config.simulation.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::SimulationConfig;

    fn config() -> SimulationConfig {
        SimulationConfig {
            unit_time: 5.0,
            flow_scalar: 2.0,
            assign_frequency: 180,
            start_assign_interval: 0,
            max_assign_interval: 4,
            seed: 42,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn zero_unit_time_rejected() {
        let mut c = config();
        c.unit_time = 0.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn small_flow_scalar_rejected() {
        let mut c = config();
        c.flow_scalar = 0.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn parses_from_yaml() {
        let yaml = "simulation:\n  unit_time: 5\n  flow_scalar: 2\n  assign_frequency: 180\n  max_assign_interval: 4\n";
        let parsed: super::ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.simulation.unit_time, 5.0);
        assert_eq!(parsed.simulation.seed, 4711);
        assert_eq!(parsed.simulation.start_assign_interval, 0);
    }
}
