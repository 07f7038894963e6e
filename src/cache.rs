// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The memoizing cache shared by commit lookups and provenance resolution.
//!
//! Images and snapshots built from the same revisions resolve to the same
//! commits and configs, so one run asks the same questions many times. The
//! cache is created once per run and handed to the components that need it.
//! Entries expire after a fixed time. When a cache is full, moka's TinyLFU
//! policy decides which entries to admit and which to evict.

use std::{sync::Arc, time::Duration};

use moka::sync::Cache;

use crate::{
    github::Commit,
    refs::{CommitSha, ConfigKey, RepoRef, ResourceGroup},
    resolver::Provenance,
};

pub const DEFAULT_CAPACITY: u64 = 100;
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Identifies one resolution request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolutionKey {
    pub key: ConfigKey,
    pub group: ResourceGroup,
    pub disk_image: CommitSha,
    pub bootstrap: CommitSha,
}

#[derive(Clone)]
pub struct ProvenanceCache {
    histories: Cache<RepoRef, Arc<Vec<Commit>>>,
    commits: Cache<(RepoRef, CommitSha), Arc<Commit>>,
    resolutions: Cache<ResolutionKey, Option<Arc<Provenance>>>,
}

impl ProvenanceCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        fn build<K, V>(capacity: u64, ttl: Duration) -> Cache<K, V>
        where
            K: std::hash::Hash + Eq + Send + Sync + 'static,
            V: Clone + Send + Sync + 'static,
        {
            Cache::builder().max_capacity(capacity).time_to_live(ttl).build()
        }

        Self {
            histories: build(capacity, ttl),
            commits: build(capacity, ttl),
            resolutions: build(capacity, ttl),
        }
    }

    pub fn history(&self, repo: &RepoRef) -> Option<Arc<Vec<Commit>>> {
        self.histories.get(repo)
    }

    pub fn insert_history(&self, repo: RepoRef, commits: Arc<Vec<Commit>>) {
        self.histories.insert(repo, commits);
    }

    pub fn commit(
        &self,
        repo: &RepoRef,
        revision: &CommitSha,
    ) -> Option<Arc<Commit>> {
        self.commits.get(&(repo.clone(), revision.clone()))
    }

    pub fn insert_commit(
        &self,
        repo: RepoRef,
        revision: CommitSha,
        commit: Arc<Commit>,
    ) {
        self.commits.insert((repo, revision), commit);
    }

    /// Returns `Some(result)` if this resolution was already made, where the
    /// result itself may be "no provenance found".
    pub fn resolution(
        &self,
        key: &ResolutionKey,
    ) -> Option<Option<Arc<Provenance>>> {
        self.resolutions.get(key)
    }

    pub fn insert_resolution(
        &self,
        key: ResolutionKey,
        provenance: Option<Arc<Provenance>>,
    ) {
        self.resolutions.insert(key, provenance);
    }
}

impl Default for ProvenanceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}
