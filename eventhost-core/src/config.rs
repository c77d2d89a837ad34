use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_EVENT_BUFFER_SIZE: usize = 64;

const ENV_LEASE_DURATION_SECS: &str = "EVENTHOST_LEASE_DURATION_SECS";
const ENV_SCAN_INTERVAL_SECS: &str = "EVENTHOST_SCAN_INTERVAL_SECS";
const ENV_INITIAL_POSITION: &str = "EVENTHOST_INITIAL_POSITION";

/// Where a partition starts when it has never been checkpointed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialPosition {
    /// Beginning of the stream (the checkpoint sentinel).
    #[default]
    StartOfStream,
    /// The partition's high-water mark at bootstrap, skipping the backlog.
    Latest,
}

impl std::str::FromStr for InitialPosition {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "start" | "start-of-stream" => Ok(InitialPosition::StartOfStream),
            "latest" => Ok(InitialPosition::Latest),
            other => Err(Error::Config(format!("Invalid initial position {other}"))),
        }
    }
}

/// Configuration of the processor host and of the lease stores it is built with.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// How long an acquired or renewed lease stays valid. Fixed for the life of the store.
    pub lease_duration: Duration,
    /// Interval between two lease scans (renew owned, acquire available).
    pub scan_interval: Duration,
    pub initial_position: InitialPosition,
    /// Capacity of the ownership event channel.
    pub event_buffer_size: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            lease_duration: DEFAULT_LEASE_DURATION,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            initial_position: InitialPosition::default(),
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl HostConfig {
    /// Loads the configuration from the environment, unset variables keep their defaults.
    pub fn load(env_vars: HashMap<String, String>) -> Result<Self> {
        let mut config = HostConfig::default();

        if let Some(secs) = env_vars.get(ENV_LEASE_DURATION_SECS) {
            config.lease_duration = Duration::from_secs(parse_secs(ENV_LEASE_DURATION_SECS, secs)?);
        }

        if let Some(secs) = env_vars.get(ENV_SCAN_INTERVAL_SECS) {
            config.scan_interval = Duration::from_secs(parse_secs(ENV_SCAN_INTERVAL_SECS, secs)?);
        }

        if let Some(position) = env_vars.get(ENV_INITIAL_POSITION) {
            config.initial_position = position.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Renewing must happen well within the lease duration, otherwise every lease expires between
    /// two scans.
    pub fn validate(&self) -> Result<()> {
        if self.lease_duration.is_zero() {
            return Err(Error::Config("Lease duration must be positive".to_string()));
        }
        if self.scan_interval.is_zero() {
            return Err(Error::Config("Scan interval must be positive".to_string()));
        }
        if self.scan_interval >= self.lease_duration {
            return Err(Error::Config(format!(
                "Scan interval {:?} must be shorter than the lease duration {:?}",
                self.scan_interval, self.lease_duration
            )));
        }
        Ok(())
    }
}

fn parse_secs(var: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|e| Error::Config(format!("Invalid value {value} for {var}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::load(HashMap::new()).unwrap();
        assert_eq!(config, HostConfig::default());
        assert_eq!(config.lease_duration, Duration::from_secs(30));
        assert_eq!(config.initial_position, InitialPosition::StartOfStream);
    }

    #[test]
    fn test_load_from_env() {
        let env_vars = HashMap::from([
            (ENV_LEASE_DURATION_SECS.to_string(), "60".to_string()),
            (ENV_SCAN_INTERVAL_SECS.to_string(), "5".to_string()),
            (ENV_INITIAL_POSITION.to_string(), "Latest".to_string()),
        ]);

        let config = HostConfig::load(env_vars).unwrap();
        assert_eq!(config.lease_duration, Duration::from_secs(60));
        assert_eq!(config.scan_interval, Duration::from_secs(5));
        assert_eq!(config.initial_position, InitialPosition::Latest);
    }

    #[test]
    fn test_invalid_values() {
        let env_vars = HashMap::from([(ENV_LEASE_DURATION_SECS.to_string(), "soon".to_string())]);
        assert!(matches!(HostConfig::load(env_vars), Err(Error::Config(_))));

        let env_vars = HashMap::from([(ENV_INITIAL_POSITION.to_string(), "middle".to_string())]);
        assert!(matches!(HostConfig::load(env_vars), Err(Error::Config(_))));

        // scan slower than the lease expires
        let env_vars = HashMap::from([(ENV_SCAN_INTERVAL_SECS.to_string(), "45".to_string())]);
        assert!(matches!(HostConfig::load(env_vars), Err(Error::Config(_))));

        let env_vars = HashMap::from([(ENV_SCAN_INTERVAL_SECS.to_string(), "0".to_string())]);
        assert!(matches!(HostConfig::load(env_vars), Err(Error::Config(_))));
    }
}
