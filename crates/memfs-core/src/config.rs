// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Engine configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::fault::FaultPolicy;

/// Default cap on a single entry name, in bytes.
pub const DEFAULT_MAX_NAME_LEN: usize = 60;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Structural limits
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FsLimits {
    /// Longest accepted entry name, in bytes
    pub max_name_len: usize,
}

impl Default for FsLimits {
    fn default() -> Self {
        Self {
            max_name_len: DEFAULT_MAX_NAME_LEN,
        }
    }
}

/// Top-level engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FsConfig {
    pub limits: FsLimits,
    /// Deliver change events to subscribers
    pub track_events: bool,
    pub faults: FaultPolicy,
}

impl FsConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: FsConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_name_len == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_name_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
