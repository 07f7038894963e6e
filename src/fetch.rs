// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Retrieval of deployment config documents as they were at a given commit.

use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use crate::refs::{self, CommitSha, ConfigKey, RepoRef};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request for {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}")]
    Status { url: String, status: u16 },
}

/// A source of deployment config documents.
pub trait ConfigSource {
    /// Returns the raw text of `config/<key>.yaml` at `sha`, or `None` if the
    /// document doesn't exist at that commit.
    fn fetch(
        &self,
        sha: &CommitSha,
        key: &ConfigKey,
    ) -> Result<Option<String>, FetchError>;

    /// Where the document for `sha` and `key` lives, for log messages.
    fn describe(&self, sha: &CommitSha, key: &ConfigKey) -> String;
}

/// Reads config documents from a raw-content host such as
/// `raw.githubusercontent.com`.
pub struct RawContentClient {
    client: Client,
    host: String,
    repo: RepoRef,
}

impl RawContentClient {
    pub fn new(
        host: impl Into<String>,
        repo: RepoRef,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cibtool/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self { client, host: host.into(), repo })
    }
}

impl ConfigSource for RawContentClient {
    fn fetch(
        &self,
        sha: &CommitSha,
        key: &ConfigKey,
    ) -> Result<Option<String>, FetchError> {
        let url = self.describe(sha, key);
        let transport =
            |source| FetchError::Transport { url: url.clone(), source };

        let head = self.client.head(&url).send().map_err(transport)?;
        if !head.status().is_success() {
            debug!(%url, status = head.status().as_u16(), "no config document");
            return Ok(None);
        }

        let response = self.client.get(&url).send().map_err(transport)?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status: response.status().as_u16(),
            });
        }

        response.text().map(Some).map_err(transport)
    }

    fn describe(&self, sha: &CommitSha, key: &ConfigKey) -> String {
        refs::config_document_url(&self.host, &self.repo, sha, key)
    }
}
