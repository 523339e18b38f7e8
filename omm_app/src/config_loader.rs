use std::path::Path;

use config::Config;
use config::ConfigError;
use config::File;
use omm_session::SessionConfig;
use omm_types::ChannelConfig;
use serde::Deserialize;
use tracing::Level;

/// Simulated traffic driven by the demo consumer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Service every simulated provider offers
    pub service: String,
    pub items: Vec<String>,
    pub update_interval_ms: u64,
    /// Stop after this long, run until Ctrl+C when unset
    pub run_secs: Option<u64>,
    /// Drop the first channel's connection after this long, to show failover
    pub disconnect_after_secs: Option<u64>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            service: "DIRECT_FEED".to_string(),
            items: vec!["IBM.N".to_string(), "MSFT.O".to_string()],
            update_interval_ms: 1000,
            run_secs: None,
            disconnect_after_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
    pub level: String,
    pub stdout: bool,
}

impl LoggingConfig {
    /// Configured level, INFO when it does not parse
    pub fn level(&self) -> Level {
        self.level.parse().unwrap_or(Level::INFO)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { dir: "./logs".to_string(), level: "info".to_string(), stdout: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfigFile {
    pub session: SessionConfig,
    #[serde(default)]
    pub demo: DemoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ConsumerConfigFile {
    fn default() -> Self {
        let session = SessionConfig::new("Consumer_1")
            .with_channel(ChannelConfig::new("Channel_1", "localhost", 14002))
            .with_channel(ChannelConfig::new("Channel_2", "localhost", 14003));
        Self { session, demo: DemoConfig::default(), logging: LoggingConfig::default() }
    }
}

pub fn load_consumer_config<P: AsRef<Path>>(path: P) -> Result<ConsumerConfigFile, ConfigError> {
    let config = Config::builder().add_source(File::from(path.as_ref())).build()?;

    config.try_deserialize()
}

/// Load consumer config with fallback to default
pub fn load_consumer_config_or_default(path: &str) -> ConsumerConfigFile {
    match load_consumer_config(path) {
        Ok(config) => {
            tracing::info!(path, channels = config.session.channels.len(), "Loaded consumer config");
            config
        }
        Err(err) => {
            tracing::warn!(path, error = %err, "Failed to load consumer config, using defaults");
            ConsumerConfigFile::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use omm_session::DispatchMode;
    use omm_session::WarmStandbyMode;

    use super::*;

    const SAMPLE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../config/consumer.toml");

    #[test]
    fn test_sample_config_loads() {
        let config = load_consumer_config(SAMPLE).unwrap();

        assert_eq!(config.session.name, "Consumer_1");
        assert_eq!(config.session.channels.len(), 3);
        assert_eq!(config.session.dispatch, DispatchMode::Api);
        assert_eq!(config.session.warm_standby_groups[0].mode, WarmStandbyMode::LoginBased);
        assert_eq!(config.session.service_lists[0].services, vec!["DIRECT_FEED".to_string(), "BACKUP_FEED".to_string()]);
        assert_eq!(config.session.reconnect.max_delay_ms, 5000);
        assert!(config.session.validate().is_ok());
        assert_eq!(config.demo.service, "DIRECT_FEED");
        assert_eq!(config.logging.level(), Level::INFO);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = load_consumer_config_or_default("does/not/exist.toml");

        assert_eq!(config.session.channels.len(), 2);
        assert!(config.session.validate().is_ok());
        assert_eq!(config.demo.items.len(), 2);
        assert_eq!(config.logging.dir, "./logs");
    }

    #[test]
    fn test_bad_level_defaults_to_info() {
        let logging = LoggingConfig { level: "chatty".to_string(), ..Default::default() };
        assert_eq!(logging.level(), Level::INFO);
        assert_eq!(LoggingConfig { level: "debug".to_string(), ..Default::default() }.level(), Level::DEBUG);
    }
}
