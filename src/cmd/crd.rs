//! # Custom resource definition module
//!
//! This module provides custom resource module command line interface
//! function implementation

use std::{error::Error, str::FromStr, sync::Arc};

use async_trait::async_trait;
use clap::Subcommand;
use kube::CustomResourceExt;

use crate::{
    cmd::Executor,
    svc::{cfg::Configuration, crd::broker::Broker},
};

// -----------------------------------------------------------------------------
// CustomResource enum

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub enum CustomResource {
    Broker,
}

impl FromStr for CustomResource {
    type Err = Box<dyn Error + Send + Sync>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "broker" => Ok(Self::Broker),
            _ => Err(format!("failed to parse '{}', available option is 'broker'", s).into()),
        }
    }
}

// -----------------------------------------------------------------------------
// CustomResourceDefinitionError enum

#[derive(thiserror::Error, Debug)]
pub enum CustomResourceDefinitionError {
    #[error("failed to serialize custom resource definition, {0}")]
    Serialize(serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// CustomResourceDefinition enum

#[derive(Subcommand, Clone, Debug)]
pub enum CustomResourceDefinition {
    /// View custom resource definition
    #[clap(name = "view", aliases = &["v"])]
    View {
        #[clap(name = "custom-resource")]
        custom_resource: Option<CustomResource>,
    },
}

#[async_trait]
impl Executor for CustomResourceDefinition {
    type Error = CustomResourceDefinitionError;

    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::View { custom_resource } => view(config, custom_resource).await,
        }
    }
}

// -----------------------------------------------------------------------------
// view function

pub async fn view(
    _config: Arc<Configuration>,
    custom_resource: &Option<CustomResource>,
) -> Result<(), CustomResourceDefinitionError> {
    // Only the broker definition is known ahead of time, the ones derived
    // from a catalog exist at runtime only
    let crds = match custom_resource {
        Some(CustomResource::Broker) | None => {
            vec![serde_yaml::to_string(&Broker::crd())
                .map_err(CustomResourceDefinitionError::Serialize)?]
        }
    };

    print!("{}", crds.join(""));
    Ok(())
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::CustomResource;

    #[test]
    fn parse_custom_resource() {
        assert_eq!(
            CustomResource::Broker,
            CustomResource::from_str("broker").expect("'broker' to be parsed")
        );
        assert_eq!(
            CustomResource::Broker,
            CustomResource::from_str("Broker").expect("'Broker' to be parsed")
        );
        assert!(CustomResource::from_str("redis").is_err());
    }
}
