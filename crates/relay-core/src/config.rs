//! Loading agent configuration from TOML.
//!
//! A config file names only the fields it changes; everything else takes
//! the `AgentConfig` default.
//!
//! ```toml
//! agent_name = "writer"
//! max_loops = 3
//! retry_attempts = 2
//! retry_interval = 500
//! stopping_condition = { kind = "token", token = "<DONE>" }
//!
//! [[response_filters]]
//! pattern = "secret"
//! replacement = "[FILTERED]"
//! ```

use std::path::Path;

use relay_contracts::{
    config::AgentConfig,
    error::{RelayError, RelayResult},
};

use crate::filter::validate_filters;

/// Parse `s` as an agent configuration and validate its response filters.
///
/// Returns `RelayError::ConfigError` if the TOML is malformed, names an
/// unknown field, or declares filters that could rewrite text forever.
pub fn agent_config_from_toml_str(s: &str) -> RelayResult<AgentConfig> {
    let config: AgentConfig = toml::from_str(s).map_err(|e| RelayError::ConfigError {
        reason: format!("failed to parse agent TOML: {}", e),
    })?;
    validate_filters(&config.response_filters)?;
    Ok(config)
}

/// Read the file at `path` and parse it with [`agent_config_from_toml_str`].
pub fn load_agent_config(path: &Path) -> RelayResult<AgentConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| RelayError::ConfigError {
        reason: format!("failed to read agent config file '{}': {}", path.display(), e),
    })?;
    agent_config_from_toml_str(&contents)
}
