use crate::core::engine::EngineParams;
use serde::Deserialize;
use std::path::PathBuf;

/// Layered settings: `gsched.toml` (explicit path first, then the user
/// config directory) overridden by `GSCHED_*` environment variables.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EngineConfig {
    /// Elite-pool capacity for the randomized construction
    #[serde(default = "default_elite_capacity")]
    pub elite_capacity: usize,
    /// Neighbourhood size of the local search
    #[serde(default = "default_k1")]
    pub k1: usize,
    /// Local-search sweeps (1 = first-improving)
    #[serde(default = "default_ls_iterations")]
    pub ls_iterations: u32,
    /// Candidate-window parameter of the randomized greedy
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Adjacent-swap bias of the randomized greedy
    #[serde(default = "default_pi")]
    pub pi: f64,
    /// Randomized construction passes (clamped to nodes x jobs x gpus)
    #[serde(default = "default_max_random_iter")]
    pub max_random_iter: u32,
    /// Upper bound on the scheduling window in seconds (unset = unbounded)
    #[serde(default)]
    pub scheduling_interval: Option<f64>,
}

fn default_elite_capacity() -> usize {
    10
}

fn default_k1() -> usize {
    10
}

fn default_ls_iterations() -> u32 {
    1
}

fn default_alpha() -> f64 {
    0.05
}

fn default_pi() -> f64 {
    0.05
}

fn default_max_random_iter() -> u32 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            elite_capacity: default_elite_capacity(),
            k1: default_k1(),
            ls_iterations: default_ls_iterations(),
            alpha: default_alpha(),
            pi: default_pi(),
            max_random_iter: default_max_random_iter(),
            scheduling_interval: None,
        }
    }
}

impl EngineConfig {
    pub fn to_params(&self) -> EngineParams {
        EngineParams {
            elite_capacity: self.elite_capacity,
            k1: self.k1,
            ls_iterations: self.ls_iterations,
            alpha: self.alpha,
            pi: self.pi,
            max_random_iter: self.max_random_iter,
            scheduling_interval: self.scheduling_interval,
        }
    }
}

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))
        .map(|p| p.join("gsched"))
}

pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config, config::ConfigError> {
    let mut config_vec = vec![];

    // User-provided config file
    if let Some(config_path) = config_path {
        if config_path.exists() {
            config_vec.push(config_path.clone());
        } else {
            eprintln!("Warning: Config file {config_path:?} not found.");
        }
    }

    // Default config file
    if let Ok(default_config_path) = get_config_dir().map(|d| d.join("gsched.toml")) {
        if default_config_path.exists() {
            config_vec.push(default_config_path);
        }
    }

    let settings = config::Config::builder();
    let settings = config_vec.iter().fold(settings, |s, path| {
        s.add_source(config::File::from(path.as_path()))
    });

    settings
        .add_source(
            config::Environment::with_prefix("GSCHED")
                .separator("_")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.elite_capacity, 10);
        assert_eq!(config.engine.ls_iterations, 1);
        assert_eq!(config.engine.scheduling_interval, None);
        let params = config.engine.to_params();
        assert_eq!(params.interval(), f64::INFINITY);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "[engine]\nelite_capacity = 5\nalpha = 0.2\nscheduling_interval = 3600.0"
        )
        .unwrap();

        let config = load_config(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.engine.elite_capacity, 5);
        assert_eq!(config.engine.alpha, 0.2);
        assert_eq!(config.engine.scheduling_interval, Some(3600.0));
        // untouched keys keep their defaults
        assert_eq!(config.engine.k1, 10);
    }
}
