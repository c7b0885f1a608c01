use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tether::{LocalServerConfig, SimulationConfig, StatsConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    pub tick_rate: u32,
    pub duration_secs: f64,
    pub clients: usize,
    pub matches: usize,
    pub report_interval_secs: f64,
    pub server: LocalServerConfig,
    pub server_simulation: SimulationConfig,
    pub client_simulation: SimulationConfig,
    pub stats: StatsConfig,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            duration_secs: 10.0,
            clients: 4,
            matches: 2,
            report_interval_secs: 2.0,
            server: LocalServerConfig::default(),
            server_simulation: SimulationConfig::default(),
            client_simulation: SimulationConfig::symmetric(0.04, 0.01),
            stats: StatsConfig::default(),
        }
    }
}

impl LoopbackConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Seed for the client at `index`, so clients jitter independently.
    pub fn client_simulation(&self, index: usize) -> SimulationConfig {
        SimulationConfig {
            seed: self.client_simulation.seed.map(|s| s.wrapping_add(index as u64)),
            ..self.client_simulation.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: LoopbackConfig = toml::from_str(
            r#"
            clients = 8

            [client_simulation]
            emission_delay_mean = 0.1
            seed = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.clients, 8);
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.client_simulation.emission_delay_mean, 0.1);
        assert_eq!(config.client_simulation.reception_delay_mean, 0.0);
        assert_eq!(config.client_simulation(2).seed, Some(5));
        assert_eq!(config.server.max_clients, 254);
    }
}
