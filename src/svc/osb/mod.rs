//! # Open service broker module
//!
//! This module provides a client for the open service broker api, limited to
//! the operations the operator relies on, fetching the catalog and
//! provisioning a service instance.

use std::fmt::{self, Debug, Formatter};

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::svc::osb::{
    catalog::Catalog,
    provision::{ProvisionRequest, ProvisionResponse},
};

pub mod catalog;
pub mod provision;

// -----------------------------------------------------------------------------
// Constants

/// version of the open service broker api advertised on each request
pub const API_VERSION: &str = "2.13";

pub const API_VERSION_HEADER: &str = "X-Broker-API-Version";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create http client, {0}")]
    CreateClient(reqwest::Error),
    #[error("failed to execute request on service broker, {0}")]
    Request(reqwest::Error),
    #[error("failed to deserialize service broker response, {0}")]
    Deserialize(reqwest::Error),
    #[error("service broker returned an unexpected status code {0}, {1}")]
    Response(StatusCode, String),
}

// -----------------------------------------------------------------------------
// Api trait

/// operations exposed by a service broker, abstracted behind a trait so
/// reconciliation loops can be exercised against a mock in tests
#[async_trait]
pub trait Api: Send + Sync {
    /// retrieve the whole catalog of services and plans advertised by the
    /// broker, one synchronous call, no caching and no pagination
    async fn catalog(&self) -> Result<Catalog, Error>;

    /// provision one instance of a plan on the broker
    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionResponse, Error>;
}

// -----------------------------------------------------------------------------
// Client structure

/// http client authenticated with basic credentials against the broker
/// endpoint
#[derive(Clone)]
pub struct Client {
    inner: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl Debug for Client {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .finish()
    }
}

impl Client {
    pub fn new(endpoint: &str, username: &str, password: &str) -> Result<Self, Error> {
        let inner = reqwest::Client::builder()
            .build()
            .map_err(Error::CreateClient)?;

        Ok(Self {
            inner,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Api for Client {
    async fn catalog(&self) -> Result<Catalog, Error> {
        let response = self
            .inner
            .get(format!("{}/v2/catalog", self.endpoint))
            .basic_auth(&self.username, Some(&self.password))
            .header(API_VERSION_HEADER, API_VERSION)
            .send()
            .await
            .map_err(Error::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Response(
                status,
                response.text().await.unwrap_or_default(),
            ));
        }

        response.json().await.map_err(Error::Deserialize)
    }

    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionResponse, Error> {
        let response = self
            .inner
            .put(format!(
                "{}/v2/service_instances/{}",
                self.endpoint, request.instance_id
            ))
            .basic_auth(&self.username, Some(&self.password))
            .header(API_VERSION_HEADER, API_VERSION)
            .json(request)
            .send()
            .await
            .map_err(Error::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Response(
                status,
                response.text().await.unwrap_or_default(),
            ));
        }

        response.json().await.map_err(Error::Deserialize)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::Client;

    #[test]
    fn client_strips_trailing_slash_from_endpoint() {
        let client = Client::new("http://broker.example.com/", "user", "pass")
            .expect("client to be created");

        assert_eq!("http://broker.example.com", client.endpoint());
    }

    #[test]
    fn client_debug_does_not_expose_password() {
        let client = Client::new("http://broker.example.com", "user", "hunter2")
            .expect("client to be created");

        let repr = format!("{:?}", client);
        assert!(repr.contains("user"));
        assert!(!repr.contains("hunter2"));
    }
}
