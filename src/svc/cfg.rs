//! # Configuration module
//!
//! This module provides utilities and helpers to interact with the
//! configuration

use std::{convert::TryFrom, path::PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

// -----------------------------------------------------------------------------
// Constants

/// placeholder organization identifier sent on each provisioning request, the
/// open service broker api requires one even when the platform has no concept
/// of organization
pub const DEFAULT_ORGANIZATION: &str = "default";

/// placeholder space identifier, see [`DEFAULT_ORGANIZATION`]
pub const DEFAULT_SPACE: &str = "default";

// -----------------------------------------------------------------------------
// Provisioning structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Provisioning {
    #[serde(rename = "organization")]
    pub organization: String,
    #[serde(rename = "space")]
    pub space: String,
}

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to load file '{0:?}', {1}")]
    File(PathBuf, ConfigError),
    #[error("failed to load configuration, {0}")]
    Cast(ConfigError),
    #[error("failed to set default for key '{0}', {1}")]
    Default(String, ConfigError),
    #[error("failed to build configuration, {0}")]
    Build(ConfigError),
}

// -----------------------------------------------------------------------------
// Configuration structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Configuration {
    #[serde(rename = "provisioning")]
    pub provisioning: Provisioning,
}

impl TryFrom<PathBuf> for Configuration {
    type Error = Error;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        defaults()?
            .add_source(File::from(path.to_owned()).required(true))
            .add_source(Environment::with_prefix(&env!("CARGO_PKG_NAME").replace('-', "_")).separator("__"))
            .build()
            .map_err(|err| Error::File(path, err))?
            .try_deserialize()
            .map_err(Error::Cast)
    }
}

impl Configuration {
    /// try to load the configuration from the default locations, each file is
    /// optional and values already loaded are overridden by the next source
    pub fn try_default() -> Result<Self, Error> {
        let mut builder = defaults()?;

        for path in [
            PathBuf::from(format!("/usr/share/{}/config", env!("CARGO_PKG_NAME"))),
            PathBuf::from(format!("/etc/{}/config", env!("CARGO_PKG_NAME"))),
            PathBuf::from(format!(
                "{}/.config/{}/config",
                env!("HOME"),
                env!("CARGO_PKG_NAME")
            )),
            PathBuf::from(format!(
                "{}/.local/share/{}/config",
                env!("HOME"),
                env!("CARGO_PKG_NAME")
            )),
            PathBuf::from("config"),
        ] {
            builder = builder.add_source(File::from(path).required(false));
        }

        builder
            .add_source(Environment::with_prefix(&env!("CARGO_PKG_NAME").replace('-', "_")).separator("__"))
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Cast)
    }

    /// print hints about the loaded configuration
    pub fn help(&self) {
        if DEFAULT_ORGANIZATION == self.provisioning.organization {
            info!(
                "Provisioning requests will use the placeholder organization identifier '{}'",
                DEFAULT_ORGANIZATION
            );
        }

        if DEFAULT_SPACE == self.provisioning.space {
            info!(
                "Provisioning requests will use the placeholder space identifier '{}'",
                DEFAULT_SPACE
            );
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, Error> {
    Config::builder()
        .set_default("provisioning.organization", DEFAULT_ORGANIZATION)
        .map_err(|err| Error::Default("provisioning.organization".into(), err))?
        .set_default("provisioning.space", DEFAULT_SPACE)
        .map_err(|err| Error::Default("provisioning.space".into(), err))
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{Configuration, DEFAULT_ORGANIZATION, DEFAULT_SPACE};

    #[test]
    fn defaults_provide_placeholder_identifiers() {
        let config = super::defaults()
            .and_then(|builder| builder.build().map_err(super::Error::Build))
            .and_then(|config| {
                config
                    .try_deserialize::<Configuration>()
                    .map_err(super::Error::Cast)
            })
            .expect("configuration to load from defaults");

        assert_eq!(DEFAULT_ORGANIZATION, config.provisioning.organization);
        assert_eq!(DEFAULT_SPACE, config.provisioning.space);
    }
}
