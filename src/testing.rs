// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory stand-ins for the network-facing collaborators.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap},
};

use crate::{
    azure::compute::{ComputeClient, ManagedResource, ResourceKind},
    error::LookupError,
    fetch::{ConfigSource, FetchError},
    github::{Commit, CommitDetail, CommitSource, Signature},
    refs::{CommitSha, ConfigKey, RepoRef, ResourceGroup},
};

pub fn commit(sha: &str, message: &str) -> Commit {
    Commit {
        sha: sha.to_string(),
        commit: CommitDetail {
            committer: Signature { date: "2020-05-14T12:34:56Z".to_string() },
            message: message.to_string(),
        },
    }
}

/// A deployment config whose only target is `group`.
pub fn config_with_group(
    group: &str,
    source_revision: &str,
    deployment_id: Option<&str>,
) -> String {
    let mut doc = format!(
        "image:\n  os: Windows 10\n  edition: Professional\n  language: en-US\n  \
         architecture: x86-64\n\
         iso:\n  source:\n    key: iso/win10.iso\n  wimindex: 5\n\
         target:\n  - group: {group}\n    region: East US\n    tag:\n      \
         - name: sourceOrganisation\n        value: mozilla-releng\n      \
         - name: sourceRepository\n        value: OpenCloudConfig\n      \
         - name: sourceRevision\n        value: '{source_revision}'\n"
    );
    if let Some(id) = deployment_id {
        doc.push_str(&format!(
            "      - name: deploymentId\n        value: '{id}'\n"
        ));
    }
    doc
}

/// A commit history of one repository, plus older commits that are only
/// reachable by direct lookup.
pub struct FakeCommits {
    history: Vec<Commit>,
    archived: Vec<Commit>,
    fail_with: Option<u16>,
    history_calls: Cell<usize>,
    commit_calls: Cell<usize>,
}

impl FakeCommits {
    pub fn new(history: Vec<Commit>) -> Self {
        Self {
            history,
            archived: Vec::new(),
            fail_with: None,
            history_calls: Cell::new(0),
            commit_calls: Cell::new(0),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self { fail_with: Some(status), ..Self::new(Vec::new()) }
    }

    pub fn with_archived(mut self, commit: Commit) -> Self {
        self.archived.push(commit);
        self
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.get()
    }

    pub fn commit_calls(&self) -> usize {
        self.commit_calls.get()
    }

    fn status(&self, what: &'static str, status: u16) -> LookupError {
        LookupError::Status {
            what,
            url: "https://api.github.test".to_string(),
            status,
            body: String::new(),
        }
    }
}

impl CommitSource for FakeCommits {
    fn history(&self, _repo: &RepoRef) -> Result<Vec<Commit>, LookupError> {
        self.history_calls.set(self.history_calls.get() + 1);
        match self.fail_with {
            Some(status) => Err(self.status("commits", status)),
            None => Ok(self.history.clone()),
        }
    }

    fn commit(
        &self,
        _repo: &RepoRef,
        revision: &CommitSha,
    ) -> Result<Commit, LookupError> {
        self.commit_calls.set(self.commit_calls.get() + 1);
        if let Some(status) = self.fail_with {
            return Err(self.status("commit", status));
        }

        self.history
            .iter()
            .chain(self.archived.iter())
            .find(|c| revision.is_prefix_of(&c.sha))
            .cloned()
            .ok_or_else(|| self.status("commit", 404))
    }
}

/// Config documents keyed by full commit sha.
#[derive(Default)]
pub struct FakeConfigs {
    documents: HashMap<String, String>,
    failing: Vec<String>,
    fetches: Cell<usize>,
}

impl FakeConfigs {
    pub fn insert(&mut self, sha: &str, document: String) {
        self.documents.insert(sha.to_string(), document);
    }

    /// Makes fetches of any document at `sha` fail.
    pub fn fail(&mut self, sha: &str) {
        self.failing.push(sha.to_string());
    }

    pub fn fetches(&self) -> usize {
        self.fetches.get()
    }
}

impl ConfigSource for FakeConfigs {
    fn fetch(
        &self,
        sha: &CommitSha,
        key: &ConfigKey,
    ) -> Result<Option<String>, FetchError> {
        self.fetches.set(self.fetches.get() + 1);
        if self.failing.iter().any(|s| s == sha.as_str()) {
            return Err(FetchError::Status {
                url: self.describe(sha, key),
                status: 502,
            });
        }

        Ok(self.documents.get(sha.as_str()).cloned())
    }

    fn describe(&self, sha: &CommitSha, key: &ConfigKey) -> String {
        format!("fake://{sha}/config/{key}.yaml")
    }
}

/// Images and snapshots in resource groups, with a log of every update.
#[derive(Default)]
pub struct FakeCompute {
    resources: RefCell<Vec<(ResourceGroup, ResourceKind, ManagedResource)>>,
    updates: RefCell<Vec<(ResourceKind, String, BTreeMap<String, String>)>>,
}

impl FakeCompute {
    pub fn add(
        &self,
        group: &str,
        kind: ResourceKind,
        name: &str,
        tags: &[(&str, &str)],
    ) {
        let group = ResourceGroup::new(group).unwrap();
        let resource = ManagedResource {
            id: format!("/subscriptions/s/resourceGroups/{group}/{name}"),
            name: name.to_string(),
            location: "eastus".to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: serde_json::json!({ "name": name }),
        };
        self.resources.borrow_mut().push((group, kind, resource));
    }

    pub fn updates(
        &self,
    ) -> Vec<(ResourceKind, String, BTreeMap<String, String>)> {
        self.updates.borrow().clone()
    }
}

impl ComputeClient for FakeCompute {
    fn list(
        &self,
        group: &ResourceGroup,
        kind: ResourceKind,
    ) -> anyhow::Result<Vec<ManagedResource>> {
        Ok(self
            .resources
            .borrow()
            .iter()
            .filter(|(g, k, _)| g == group && *k == kind)
            .map(|(_, _, r)| r.clone())
            .collect())
    }

    fn update_tags(
        &self,
        group: &ResourceGroup,
        kind: ResourceKind,
        resource: &ManagedResource,
        tags: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        for (g, k, r) in self.resources.borrow_mut().iter_mut() {
            if g == group && *k == kind && r.name == resource.name {
                r.tags = tags.clone();
            }
        }
        self.updates.borrow_mut().push((
            kind,
            resource.name.clone(),
            tags.clone(),
        ));
        Ok(())
    }
}
