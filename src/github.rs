// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Commit lookups against the GitHub REST API.

use std::{sync::Arc, time::Duration};

use reqwest::{blocking::Client, header::ACCEPT};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, error};

use crate::{
    cache::ProvenanceCache,
    error::LookupError,
    refs::{self, CommitSha, RepoRef},
    util,
};

#[derive(Clone, Debug, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub commit: CommitDetail,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CommitDetail {
    pub committer: Signature,
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Signature {
    pub date: String,
}

impl Commit {
    /// The committer timestamp, e.g. `2020-05-14T12:34:56Z`.
    pub fn time(&self) -> &str {
        &self.commit.committer.date
    }

    pub fn date(&self) -> &str {
        util::date_part(self.time())
    }

    pub fn summary(&self) -> &str {
        util::first_line(&self.commit.message)
    }
}

/// A source of commit history.
pub trait CommitSource {
    /// Returns the most recent commits of `repo`, newest first.
    fn history(&self, repo: &RepoRef) -> Result<Vec<Commit>, LookupError>;

    /// Returns the commit that `revision` abbreviates.
    fn commit(
        &self,
        repo: &RepoRef,
        revision: &CommitSha,
    ) -> Result<Commit, LookupError>;
}

pub struct GithubClient {
    client: Client,
    api: String,
    token: Option<String>,
    history_depth: u32,
}

impl GithubClient {
    pub fn new(
        api: impl Into<String>,
        token: Option<String>,
        history_depth: u32,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cibtool/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self { client, api: api.into(), token, history_depth })
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        what: &'static str,
        url: String,
    ) -> Result<T, LookupError> {
        debug!(%url, "{what} lookup");
        let mut request =
            self.client.get(&url).header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send() {
            Ok(response) => response,
            Err(source) => {
                return Err(LookupError::Transport { what, url, source })
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            error!(%url, status = status.as_u16(), %body, "{what} lookup failed");
            return Err(LookupError::Status {
                what,
                url,
                status: status.as_u16(),
                body,
            });
        }

        let body = match response.text() {
            Ok(body) => body,
            Err(source) => {
                return Err(LookupError::Transport { what, url, source })
            }
        };

        serde_json::from_str(&body).map_err(|e| LookupError::Decode {
            what,
            url,
            reason: e.to_string(),
        })
    }
}

impl CommitSource for GithubClient {
    fn history(&self, repo: &RepoRef) -> Result<Vec<Commit>, LookupError> {
        self.get_json(
            "commits",
            refs::commits_url(&self.api, repo, self.history_depth),
        )
    }

    fn commit(
        &self,
        repo: &RepoRef,
        revision: &CommitSha,
    ) -> Result<Commit, LookupError> {
        self.get_json("commit", refs::commit_url(&self.api, repo, revision))
    }
}

/// Commit lookups that go through the run's [`ProvenanceCache`].
#[derive(Clone)]
pub struct CommitLookup {
    source: Arc<dyn CommitSource>,
    cache: ProvenanceCache,
}

impl CommitLookup {
    pub fn new(source: Arc<dyn CommitSource>, cache: ProvenanceCache) -> Self {
        Self { source, cache }
    }

    pub fn history(
        &self,
        repo: &RepoRef,
    ) -> Result<Arc<Vec<Commit>>, LookupError> {
        if let Some(commits) = self.cache.history(repo) {
            return Ok(commits);
        }

        let commits = Arc::new(self.source.history(repo)?);
        self.cache.insert_history(repo.clone(), commits.clone());
        Ok(commits)
    }

    /// Finds the commit that `revision` abbreviates, preferring the recent
    /// history of `repo` and falling back to a direct lookup for older
    /// commits.
    pub fn commit(
        &self,
        repo: &RepoRef,
        revision: &CommitSha,
    ) -> Result<Arc<Commit>, LookupError> {
        if let Some(commit) = self.cache.commit(repo, revision) {
            return Ok(commit);
        }

        let history = self.history(repo)?;
        let known = history.iter().find(|c| revision.is_prefix_of(&c.sha));
        let commit = match known {
            Some(commit) => Arc::new(commit.clone()),
            None => Arc::new(self.source.commit(repo, revision)?),
        };

        self.cache
            .insert_commit(repo.clone(), revision.clone(), commit.clone());
        Ok(commit)
    }
}
