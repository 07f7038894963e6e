// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Taskcluster secrets and worker-manager calls.
//!
//! Both go through the Taskcluster proxy available to CI tasks, which
//! attaches the task's credentials, so no signing happens here.

use std::time::Duration;

use anyhow::{Context as _, Result};
use reqwest::{blocking::Client, StatusCode};
use serde::Deserialize;
use tracing::info;

use crate::pool::ProviderConfig;

/// The image builder's secret.
#[derive(Clone, Debug, Deserialize)]
pub struct ImageBuilderSecret {
    pub azure: AzureCredentials,
}

/// An Azure service principal and the subscription it works in.
#[derive(Clone, Deserialize)]
pub struct AzureCredentials {
    /// Client (application) id.
    pub id: String,
    /// Client secret.
    pub key: String,
    /// Tenant id.
    pub account: String,
    pub subscription: String,
}

impl std::fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .field("account", &self.account)
            .field("subscription", &self.subscription)
            .finish()
    }
}

fn client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .user_agent(concat!("cibtool/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?)
}

pub struct SecretsClient {
    client: Client,
    root_url: String,
}

impl SecretsClient {
    pub fn new(root_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: client(timeout)?,
            root_url: root_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn get(&self, name: &str) -> Result<ImageBuilderSecret> {
        #[derive(Deserialize)]
        struct Envelope {
            secret: ImageBuilderSecret,
        }

        let url = format!("{}/api/secrets/v1/secret/{}", self.root_url, name);
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("fetching secret {name}"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("fetching secret {name} returned {status}");
        }

        let envelope: Envelope = response
            .json()
            .with_context(|| format!("reading secret {name}"))?;
        Ok(envelope.secret)
    }
}

/// Creates and updates worker pools.
pub trait WorkerManager {
    fn create_or_update_worker_pool(
        &self,
        worker_pool_id: &str,
        config: &ProviderConfig,
    ) -> Result<()>;
}

pub struct TaskclusterWorkerManager {
    client: Client,
    root_url: String,
}

impl TaskclusterWorkerManager {
    pub fn new(root_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: client(timeout)?,
            root_url: root_url.trim_end_matches('/').to_string(),
        })
    }
}

impl WorkerManager for TaskclusterWorkerManager {
    fn create_or_update_worker_pool(
        &self,
        worker_pool_id: &str,
        config: &ProviderConfig,
    ) -> Result<()> {
        let url = format!(
            "{}/api/worker-manager/v1/worker-pool/{}",
            self.root_url, worker_pool_id
        );

        // updateWorkerPool is a POST; createWorkerPool is a PUT to the same
        // path and is only needed the first time a pool is published.
        let response = self
            .client
            .post(&url)
            .json(config)
            .send()
            .with_context(|| format!("updating worker pool {worker_pool_id}"))?;
        let response = if response.status() == StatusCode::NOT_FOUND {
            info!(worker_pool_id, "worker pool does not exist; creating it");
            self.client.put(&url).json(config).send().with_context(|| {
                format!("creating worker pool {worker_pool_id}")
            })?
        } else {
            response
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            anyhow::bail!(
                "publishing worker pool {worker_pool_id} returned {status}: \
                 {body}"
            );
        }

        info!(worker_pool_id, "worker pool published");
        Ok(())
    }
}
