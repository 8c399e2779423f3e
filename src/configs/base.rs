use serde::{Deserialize, Serialize};

use crate::{common::types::AnyResult, configs::*};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub abr: AbrConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Load `config.toml`, falling back to `config.default.toml`.
    ///
    /// Returns `Ok(None)` when neither file exists so callers can run on defaults.
    pub fn load() -> AnyResult<Option<Self>> {
        let config_path = if std::path::Path::new("config.toml").exists() {
            "config.toml"
        } else if std::path::Path::new("config.default.toml").exists() {
            "config.default.toml"
        } else {
            return Ok(None);
        };

        let config_str = std::fs::read_to_string(config_path)?;
        Self::parse(&config_str)
            .map(Some)
            .map_err(|e| format!("{}: {}", config_path, e).into())
    }

    pub fn parse(config_str: &str) -> AnyResult<Self> {
        let config: Config = toml::from_str(config_str)?;
        config.player.validate()?;
        config.abr.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.player.buffer_duration_secs, 4);
        assert_eq!(config.player.interval_duration_secs, 2.0);
        assert_eq!(config.abr.window, 3);
        assert_eq!(config.network.timeout_secs, 15);
        assert!(config.logging.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            r#"
            [player]
            buffer_duration_secs = 6
            interval_duration_secs = 1.5
            max_retries = 2

            [abr]
            window = 5
            upgrade_threshold = 0.25

            [network]
            user_agent = "test-agent"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.player.buffer_duration_secs, 6);
        assert_eq!(config.player.interval_duration_secs, 1.5);
        assert_eq!(config.player.max_retries, 2);
        assert_eq!(config.player.retention_margin, 1);
        assert_eq!(config.abr.window, 5);
        assert_eq!(config.abr.upgrade_threshold, 0.25);
        assert_eq!(config.abr.downgrade_threshold, 0.6);
        assert_eq!(config.network.user_agent.as_deref(), Some("test-agent"));
        assert_eq!(
            config.logging.and_then(|l| l.level).as_deref(),
            Some("debug")
        );
    }

    #[test]
    fn interval_longer_than_buffer_is_rejected() {
        let err = Config::parse(
            r#"
            [player]
            buffer_duration_secs = 2
            interval_duration_secs = 3.0
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn inverted_abr_band_is_rejected() {
        let err = Config::parse(
            r#"
            [abr]
            upgrade_threshold = 0.7
            downgrade_threshold = 0.6
            "#,
        );
        assert!(err.is_err());
    }
}
