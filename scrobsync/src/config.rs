//! Engine settings derived from the TOML configuration

use crate::services::listenbrainz_client::ClientSettings;
use crate::services::listens_synchronizer::SynchronizerSettings;
use crate::services::play_threshold::PlayThreshold;
use scrobsync_common::config::TomlConfig;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub client: ClientSettings,
    pub synchronizer: SynchronizerSettings,
    pub internal_threshold: PlayThreshold,
    pub listenbrainz_threshold: PlayThreshold,
}

impl EngineSettings {
    pub fn from_toml(config: &TomlConfig) -> Self {
        let lb = &config.listenbrainz;

        Self {
            client: ClientSettings {
                base_url: lb.api_base_url.clone(),
                timeout: Duration::from_secs(lb.request_timeout_secs),
                min_request_interval: Duration::from_millis(lb.min_request_interval_ms),
            },
            synchronizer: SynchronizerSettings::from_config(lb, &config.relay),
            internal_threshold: PlayThreshold::from(&config.internal.threshold),
            listenbrainz_threshold: PlayThreshold::from(&lb.threshold),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_toml(&TomlConfig::default())
    }
}
