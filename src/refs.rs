// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Validated identifiers for repositories, commits, config documents and
//! resource groups, plus the URL and resource id builders that consume them.
//!
//! Every URL or resource id the tool produces is assembled here from these
//! types rather than from ad hoc format strings, so a config key can never end
//! up where a commit sha belongs.

use std::{fmt, str::FromStr};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid {kind} {value:?}: {reason}")]
pub struct InvalidRef {
    kind: &'static str,
    value: String,
    reason: &'static str,
}

impl InvalidRef {
    fn new(kind: &'static str, value: &str, reason: &'static str) -> Self {
        Self { kind, value: value.to_owned(), reason }
    }
}

fn check_segment(
    kind: &'static str,
    value: &str,
) -> Result<(), InvalidRef> {
    if value.is_empty() {
        return Err(InvalidRef::new(kind, value, "must not be empty"));
    }

    if value.contains('/') || value.chars().any(char::is_whitespace) {
        return Err(InvalidRef::new(
            kind,
            value,
            "must not contain '/' or whitespace",
        ));
    }

    Ok(())
}

/// A GitHub repository, `org/repo`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RepoRef {
    org: String,
    repo: String,
}

impl RepoRef {
    pub fn new(
        org: impl Into<String>,
        repo: impl Into<String>,
    ) -> Result<Self, InvalidRef> {
        let (org, repo) = (org.into(), repo.into());
        check_segment("organisation", &org)?;
        check_segment("repository", &repo)?;
        Ok(Self { org, repo })
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.repo)
    }
}

impl FromStr for RepoRef {
    type Err = InvalidRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (org, repo) = s.split_once('/').ok_or_else(|| {
            InvalidRef::new("repository", s, "expected 'org/repo'")
        })?;
        Self::new(org, repo)
    }
}

/// A full commit sha or a short prefix of one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommitSha(String);

impl CommitSha {
    pub fn new(sha: impl Into<String>) -> Result<Self, InvalidRef> {
        let sha = sha.into();
        if sha.is_empty() {
            return Err(InvalidRef::new("commit sha", &sha, "must not be empty"));
        }

        if !sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidRef::new(
                "commit sha",
                &sha,
                "must be hexadecimal",
            ));
        }

        Ok(Self(sha.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if `full` is the sha this value abbreviates.
    pub fn is_prefix_of(&self, full: &str) -> bool {
        full.starts_with(self.0.as_str())
    }
}

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CommitSha {
    type Err = InvalidRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// The file stem of a deployment config document, e.g. `win10-64`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConfigKey(String);

impl ConfigKey {
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidRef> {
        let key = key.into();
        check_segment("config key", &key)?;
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ConfigKey {
    type Err = InvalidRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// An Azure resource group name, conventionally `rg-<region>-<domain>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceGroup(String);

const GROUP_PREFIX: &str = "rg-";

impl ResourceGroup {
    pub fn new(group: impl Into<String>) -> Result<Self, InvalidRef> {
        let group = group.into();
        check_segment("resource group", &group)?;
        Ok(Self(group))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The group name without its `rg-` prefix. Resource names inside the
    /// group start with this.
    pub fn stem(&self) -> &str {
        self.0.strip_prefix(GROUP_PREFIX).unwrap_or(&self.0)
    }

    pub fn virtual_network(&self) -> String {
        format!("vn-{}", self.stem())
    }

    pub fn subnet(&self) -> String {
        format!("sn-{}", self.stem())
    }

    /// Returns true if this group serves the supplied pool domain, i.e. its
    /// name ends in `-<domain>`.
    pub fn serves_domain(&self, domain: &str) -> bool {
        self.0
            .strip_suffix(domain)
            .is_some_and(|rest| rest.ends_with('-'))
    }
}

impl fmt::Display for ResourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceGroup {
    type Err = InvalidRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// `<host>/<org>/<repo>/<sha>/config/<key>.yaml`
pub fn config_document_url(
    raw_content_host: &str,
    repo: &RepoRef,
    sha: &CommitSha,
    key: &ConfigKey,
) -> String {
    format!(
        "{}/{}/{}/{}/config/{}.yaml",
        raw_content_host.trim_end_matches('/'),
        repo.org(),
        repo.repo(),
        sha,
        key
    )
}

/// The newest `depth` commits of `repo`.
pub fn commits_url(api: &str, repo: &RepoRef, depth: u32) -> String {
    format!(
        "{}/repos/{}/{}/commits?per_page={}",
        api.trim_end_matches('/'),
        repo.org(),
        repo.repo(),
        depth
    )
}

pub fn commit_url(api: &str, repo: &RepoRef, revision: &CommitSha) -> String {
    format!(
        "{}/repos/{}/{}/commits/{}",
        api.trim_end_matches('/'),
        repo.org(),
        repo.repo(),
        revision
    )
}

/// The human-facing page for a commit, used in pool descriptions.
pub fn commit_page_url(repo: &RepoRef, sha: &str) -> String {
    format!("https://github.com/{}/{}/commit/{}", repo.org(), repo.repo(), sha)
}

/// The ARM id of the subnet that workers in `group` attach to.
pub fn subnet_id(subscription: &str, group: &ResourceGroup) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/\
         virtualNetworks/{}/subnets/{}",
        subscription,
        group,
        group.virtual_network(),
        group.subnet()
    )
}
