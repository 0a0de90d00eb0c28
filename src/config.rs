//! Connection and reader settings, loadable from JSON

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::command::DEFAULT_COMMAND_TIMEOUT_MS;
use crate::error::{ReaderError, Result};
use crate::session::DEFAULT_TRANSPORT_TIMEOUT_MS;
use crate::types::{Region, TagProtocol};

pub const DEFAULT_BAUD_RATE: u32 = 115200;
pub const DEFAULT_ASYNC_ON_TIME_MS: u32 = 250;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Rate tried first when looking for the module
    pub baud_rate: u32,
    pub transport_timeout_ms: u32,
    pub command_timeout_ms: u32,
    /// Receive inventory results as streamed frames instead of draining the tag buffer
    pub streaming: bool,
    pub async_on_time_ms: u32,
    pub async_off_time_ms: u32,
    /// Region programmed at connect when the module reports a different one
    pub region: Option<Region>,
    pub protocol: TagProtocol,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            transport_timeout_ms: DEFAULT_TRANSPORT_TIMEOUT_MS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            streaming: false,
            async_on_time_ms: DEFAULT_ASYNC_ON_TIME_MS,
            async_off_time_ms: 0,
            region: None,
            protocol: TagProtocol::Gen2,
        }
    }
}

impl ReaderConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ReaderError::InvalidArgument(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = ReaderConfig::from_json("{}").unwrap();
        assert_eq!(config, ReaderConfig::default());
        assert_eq!(config.transport_timeout_ms, 100);
        assert_eq!(config.command_timeout_ms, 1000);
        assert_eq!(config.async_on_time_ms, 250);
        assert!(!config.streaming);
    }

    #[test]
    fn partial_override() {
        let config =
            ReaderConfig::from_json(r#"{"baud_rate": 921600, "region": "Eu3", "streaming": true}"#)
                .unwrap();
        assert_eq!(config.baud_rate, 921600);
        assert_eq!(config.region, Some(Region::Eu3));
        assert!(config.streaming);
        assert_eq!(config.protocol, TagProtocol::Gen2);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            ReaderConfig::from_json("{\"baud_rate\": \"fast\"}"),
            Err(ReaderError::Config(_))
        ));
    }

    #[test]
    fn json_round_trip() {
        let config = ReaderConfig {
            region: Some(Region::Na),
            async_off_time_ms: 50,
            ..ReaderConfig::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(ReaderConfig::from_json(&json).unwrap(), config);
    }
}
