//! HTTPS reachability check for ingress hosts

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::Reachability;

/// Timeout of a single GET
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// GETs a URL without verifying the certificate; test ingresses often serve
/// self-signed ones
pub struct HttpsReachability {
    client: Client,
}

impl HttpsReachability {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building reachability client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Reachability for HttpsReachability {
    async fn status(&self, url: &str) -> anyhow::Result<u16> {
        let response = self.client.get(url).send().await?;
        Ok(response.status().as_u16())
    }
}
