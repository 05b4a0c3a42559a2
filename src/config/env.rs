//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

use super::Configuration;

/// Environment variable prefix
const ENV_PREFIX: &str = "LOADSWARM";

/// Overrides read from `LOADSWARM_*` variables
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    /// LOADSWARM_TARGET
    pub target: Option<String>,
    /// LOADSWARM_DURATION (seconds)
    pub duration_secs: Option<u64>,
    /// LOADSWARM_TIMEOUT (milliseconds)
    pub timeout_ms: Option<u64>,
    /// LOADSWARM_LOG_LEVEL
    pub log_level: Option<String>,
    /// LOADSWARM_DRIVER_ID
    pub driver_id: Option<i64>,
    /// LOADSWARM_NR_DRIVERS
    pub nr_drivers: Option<usize>,
    /// LOADSWARM_DRIVER_SERVICE_URL
    pub driver_service_url: Option<String>,
    /// LOADSWARM_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            target: get_env("TARGET"),
            duration_secs: get_env_parse("DURATION"),
            timeout_ms: get_env_parse("TIMEOUT"),
            log_level: get_env("LOG_LEVEL"),
            driver_id: get_env_parse("DRIVER_ID"),
            nr_drivers: get_env_parse("NR_DRIVERS"),
            driver_service_url: get_env("DRIVER_SERVICE_URL"),
            config_file: get_env("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        *self != Self::default()
    }

    /// Write every set variable over `config`
    pub fn apply(&self, config: &mut Configuration) {
        if let Some(target) = &self.target {
            config.globals.target = target.clone();
        }
        if let Some(duration) = self.duration_secs {
            config.globals.duration_secs = Some(duration);
        }
        if let Some(timeout) = self.timeout_ms {
            config.globals.timeout_ms = timeout;
        }
        if let Some(level) = &self.log_level {
            config.globals.log_level = level.clone();
        }
        if let Some(id) = self.driver_id {
            config.cluster.driver_id = Some(id);
        }
        if let Some(nr) = self.nr_drivers {
            config.cluster.nr_drivers = nr;
        }
        if let Some(url) = &self.driver_service_url {
            config.cluster.driver_service_url = url.clone();
        }
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Print all LOADSWARM environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_TARGET              Base URL of the system under load");
    println!("  {ENV_PREFIX}_DURATION            Default phase duration in seconds");
    println!("  {ENV_PREFIX}_TIMEOUT             Default test timeout in milliseconds");
    println!("  {ENV_PREFIX}_LOG_LEVEL           trace, debug, info, warn, error");
    println!("  {ENV_PREFIX}_DRIVER_ID           Driver id (default: hostname suffix)");
    println!("  {ENV_PREFIX}_NR_DRIVERS          Number of drivers in the cluster");
    println!("  {ENV_PREFIX}_DRIVER_SERVICE_URL  URL agents use to reach the drivers");
    println!("  {ENV_PREFIX}_CONFIG              Path to configuration file");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sets variables for the life of the guard
    struct EnvGuard {
        previous: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn set(vars: &[(&str, &str)]) -> Self {
            let previous = vars
                .iter()
                .map(|(k, v)| {
                    let key = format!("{ENV_PREFIX}_{k}");
                    let old = env::var(&key).ok();
                    env::set_var(&key, v);
                    (key, old)
                })
                .collect();
            Self { previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.previous {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_overrides_applied() {
        let _guard = EnvGuard::set(&[
            ("TARGET", "http://shop:9000"),
            ("TIMEOUT", "2500"),
            ("DRIVER_ID", "4"),
            ("NR_DRIVERS", "not-a-number"),
        ]);

        let env = EnvConfig::load();
        assert!(env.has_any());
        assert!(env.nr_drivers.is_none());

        let mut config = Configuration::default();
        env.apply(&mut config);
        assert_eq!(config.globals.target, "http://shop:9000");
        assert_eq!(config.globals.timeout_ms, 2500);
        assert_eq!(config.cluster.driver_id, Some(4));
        assert_eq!(config.cluster.nr_drivers, 1);
    }
}
