//! Loading configuration values from TOML.
//!
//! Configuration structs live next to the component that consumes them and
//! derive `Deserialize` with `#[serde(default)]`, so a file only needs to
//! mention the values it overrides. These helpers only do the reading.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{Error, Result};

/// Parse a configuration value from a TOML document
pub fn parse_toml<T: DeserializeOwned>(source: &str) -> Result<T> {
    Ok(toml::from_str(source)?)
}

/// Read and parse a TOML configuration file
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    debug!(path = %path.display(), "loading configuration");
    let source = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_toml(&source)
}
