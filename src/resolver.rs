// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Works out which revision of a deployment config produced a machine image.
//!
//! A machine image's name records two things: the image-builder commit that
//! built its disk image, and the bootstrap revision (or deployment id) that was
//! applied on top. The image-builder commit that built the *machine* image is
//! not recorded anywhere. What is known is that it is newer than the disk
//! image commit, and that its config for the image's resource group names the
//! bootstrap revision in a `sourceRevision` or `deploymentId` tag.
//!
//! The resolver therefore walks the image-builder history from newest to
//! oldest, stopping before the disk image commit, and settles on the newest
//! commit whose config meets that condition. Only the group's tags decide a
//! match; the rest of the document may be incomplete. This is a heuristic: a
//! config that can't be fetched or read is passed over exactly like one that
//! doesn't match, so a transient fetch failure can make the resolver settle on
//! an older commit.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    cache::{ProvenanceCache, ResolutionKey},
    deployment::{DeploymentConfig, TargetTags},
    error::LookupError,
    fetch::ConfigSource,
    github::{Commit, CommitLookup},
    refs::{CommitSha, ConfigKey, RepoRef, ResourceGroup},
};

/// The config revision guessed to have produced a machine image.
#[derive(Clone, Debug)]
pub struct Provenance {
    /// The full sha of the image-builder commit.
    pub sha: String,

    /// The matched group's tags at that commit.
    pub target: TargetTags,

    /// The deployment config as it was at that commit, if it was complete
    /// enough to parse.
    pub config: Option<DeploymentConfig>,
}

/// What examining one candidate commit turned up.
#[derive(Debug)]
pub enum CandidateOutcome {
    /// The config at this commit names the bootstrap revision.
    Matched { target: TargetTags, config: Option<DeploymentConfig> },

    /// There is no config document for the key at this commit.
    NoConfig,

    /// The config exists but has no target for the resource group.
    GroupNotFound,

    /// The group's tags name some other revision.
    Mismatch { deployment_id: Option<String>, source_revision: Option<String> },

    /// The config document isn't readable YAML.
    ParseError(String),

    /// The config document couldn't be retrieved.
    FetchFailed(String),
}

/// Returns the index of the first commit in `commits` whose sha starts with
/// `revision`, or `commits.len()` if there is none.
pub fn cutoff_index(commits: &[Commit], revision: &CommitSha) -> usize {
    commits
        .iter()
        .position(|c| revision.is_prefix_of(&c.sha))
        .unwrap_or(commits.len())
}

/// Checks the tags for `group` in a config document against `bootstrap`.
/// The full config is only parsed once the tags match.
pub fn match_target(
    document: &str,
    group: &ResourceGroup,
    bootstrap: &CommitSha,
) -> CandidateOutcome {
    let target = match TargetTags::read(document, group.as_str()) {
        Ok(Some(target)) => target,
        Ok(None) => return CandidateOutcome::GroupNotFound,
        Err(e) => return CandidateOutcome::ParseError(e.to_string()),
    };

    let deployment_id = target.deployment_id();
    let source_revision = target.source_revision();
    let wanted = Some(bootstrap.as_str());
    if source_revision == wanted || deployment_id == wanted {
        let config = match DeploymentConfig::parse(document) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(%group, error = %e, "matched config is incomplete");
                None
            }
        };
        return CandidateOutcome::Matched { target, config };
    }

    CandidateOutcome::Mismatch {
        deployment_id: deployment_id.map(str::to_owned),
        source_revision: source_revision.map(str::to_owned),
    }
}

#[derive(Clone)]
pub struct Resolver {
    commits: CommitLookup,
    configs: Arc<dyn ConfigSource>,
    cache: ProvenanceCache,
    config_repo: RepoRef,
}

impl Resolver {
    /// Creates a resolver over the history of `config_repo`, whose config
    /// documents are read from `configs`.
    pub fn new(
        commits: CommitLookup,
        configs: Arc<dyn ConfigSource>,
        cache: ProvenanceCache,
        config_repo: RepoRef,
    ) -> Self {
        Self { commits, configs, cache, config_repo }
    }

    /// Finds the newest commit, among those newer than the disk image commit,
    /// whose config for `group` names `bootstrap`.
    ///
    /// Returns `Ok(None)` if no candidate matches. Only a failure to fetch the
    /// commit history is an error.
    pub fn resolve(
        &self,
        key: &ConfigKey,
        group: &ResourceGroup,
        disk_image: &CommitSha,
        bootstrap: &CommitSha,
    ) -> Result<Option<Arc<Provenance>>, LookupError> {
        let cache_key = ResolutionKey {
            key: key.clone(),
            group: group.clone(),
            disk_image: disk_image.clone(),
            bootstrap: bootstrap.clone(),
        };
        if let Some(resolved) = self.cache.resolution(&cache_key) {
            return Ok(resolved);
        }

        let commits = self.commits.history(&self.config_repo)?;
        let cutoff = cutoff_index(&commits, disk_image);
        if cutoff == commits.len() {
            debug!(
                %disk_image,
                "disk image commit not in recent history; scanning all of it"
            );
        }

        let mut resolved = None;
        for commit in &commits[..cutoff] {
            match self.evaluate(&commit.sha, key, group, bootstrap) {
                CandidateOutcome::Matched { target, config } => {
                    resolved = Some(Arc::new(Provenance {
                        sha: commit.sha.clone(),
                        target,
                        config,
                    }));
                    break;
                }
                CandidateOutcome::NoConfig => {
                    debug!(sha = %commit.sha, %key, "no config at commit");
                }
                CandidateOutcome::GroupNotFound => {
                    debug!(sha = %commit.sha, %group, "group not in config");
                }
                CandidateOutcome::Mismatch {
                    deployment_id,
                    source_revision,
                } => {
                    info!(
                        sha = %commit.sha,
                        %group,
                        deployment_id = deployment_id.as_deref().unwrap_or("-"),
                        source_revision =
                            source_revision.as_deref().unwrap_or("-"),
                        "observed revisions do not match {bootstrap}"
                    );
                }
                CandidateOutcome::ParseError(reason) => {
                    warn!(sha = %commit.sha, %reason, "failed to parse config");
                }
                CandidateOutcome::FetchFailed(reason) => {
                    warn!(sha = %commit.sha, %reason, "failed to fetch config");
                }
            }
        }

        self.cache.insert_resolution(cache_key, resolved.clone());
        Ok(resolved)
    }

    /// Examines the config for `key` at commit `sha`.
    pub fn evaluate(
        &self,
        sha: &str,
        key: &ConfigKey,
        group: &ResourceGroup,
        bootstrap: &CommitSha,
    ) -> CandidateOutcome {
        let sha = match CommitSha::new(sha) {
            Ok(sha) => sha,
            Err(e) => return CandidateOutcome::FetchFailed(e.to_string()),
        };

        let document = match self.configs.fetch(&sha, key) {
            Ok(Some(document)) => document,
            Ok(None) => return CandidateOutcome::NoConfig,
            Err(e) => return CandidateOutcome::FetchFailed(e.to_string()),
        };

        match match_target(&document, group, bootstrap) {
            CandidateOutcome::ParseError(reason) => {
                let url = self.configs.describe(&sha, key);
                CandidateOutcome::ParseError(format!("{url}: {reason}"))
            }
            outcome => outcome,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{commit, config_with_group, FakeCommits, FakeConfigs};

    const GROUP: &str = "rg-east-us-gecko-t";

    fn key() -> ConfigKey {
        ConfigKey::new("win10-64").unwrap()
    }

    fn group() -> ResourceGroup {
        ResourceGroup::new(GROUP).unwrap()
    }

    fn group_config(source_revision: &str) -> String {
        config_with_group(GROUP, source_revision, None)
    }

    fn sha(s: &str) -> CommitSha {
        CommitSha::new(s).unwrap()
    }

    fn history(n: usize) -> Vec<Commit> {
        (0..n).map(|i| commit(&format!("{i:07x}{i:033x}"), "c")).collect()
    }

    fn resolver(
        commits: Vec<Commit>,
        configs: FakeConfigs,
    ) -> (Resolver, Arc<FakeCommits>, Arc<FakeConfigs>) {
        let cache = ProvenanceCache::default();
        let source = Arc::new(FakeCommits::new(commits));
        let configs = Arc::new(configs);
        let lookup = CommitLookup::new(source.clone(), cache.clone());
        let repo = RepoRef::new("mozilla-platform-ops", "cloud-image-builder")
            .unwrap();
        (
            Resolver::new(lookup, configs.clone(), cache, repo),
            source,
            configs,
        )
    }

    #[test]
    fn cutoff_is_first_prefix_match() {
        let commits = vec![
            commit("aaaaaaa1", "x"),
            commit("bbbbbbb1", "x"),
            commit("bbbbbbb2", "x"),
        ];
        assert_eq!(cutoff_index(&commits, &sha("aaaaaaa")), 0);
        assert_eq!(cutoff_index(&commits, &sha("bbbbbbb")), 1);
        assert_eq!(cutoff_index(&commits, &sha("bbbbbbb2")), 2);
        assert_eq!(cutoff_index(&commits, &sha("ccccccc")), 3);
        assert_eq!(cutoff_index(&[], &sha("ccccccc")), 0);
    }

    #[test]
    fn returns_newest_match_before_cutoff() {
        let commits = history(6);
        let mut configs = FakeConfigs::default();
        // Commits 1 and 2 both match; commit 4 is the disk image commit and
        // commit 5, past it, also matches.
        configs.insert(&commits[0].sha, group_config("fffffff"));
        configs.insert(&commits[1].sha, group_config("def5678"));
        configs.insert(&commits[2].sha, group_config("def5678"));
        configs.insert(&commits[5].sha, group_config("def5678"));
        let disk = sha(&commits[4].sha[..7]);
        let (resolver, _, fetched) = resolver(commits.clone(), configs);

        let resolved = resolver
            .resolve(&key(), &group(), &disk, &sha("def5678"))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.sha, commits[1].sha);
        assert_eq!(fetched.fetches(), 2);
    }

    #[test]
    fn never_looks_at_or_past_the_cutoff() {
        let commits = history(4);
        let mut configs = FakeConfigs::default();
        configs.insert(&commits[2].sha, group_config("def5678"));
        configs.insert(&commits[3].sha, group_config("def5678"));
        let disk = sha(&commits[2].sha[..7]);
        let (resolver, _, fetched) = resolver(commits, configs);

        let resolved =
            resolver.resolve(&key(), &group(), &disk, &sha("def5678")).unwrap();
        assert!(resolved.is_none());
        assert_eq!(fetched.fetches(), 2);
    }

    #[test]
    fn matches_on_deployment_id() {
        let commits = history(3);
        let mut configs = FakeConfigs::default();
        configs.insert(
            &commits[1].sha,
            config_with_group(GROUP, "1111111", Some("0a1b2c3")),
        );
        let disk = sha(&commits[2].sha[..7]);
        let (resolver, _, _) = resolver(commits.clone(), configs);

        let resolved = resolver
            .resolve(&key(), &group(), &disk, &sha("0a1b2c3"))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.sha, commits[1].sha);
        assert_eq!(resolved.target.deployment_id(), Some("0a1b2c3"));
        assert!(resolved.config.as_ref().unwrap().target(GROUP).is_some());
    }

    #[test]
    fn incomplete_config_elsewhere_does_not_hide_newest_match() {
        let commits = history(4);
        let mut configs = FakeConfigs::default();
        let mut incomplete = group_config("def5678");
        incomplete.push_str("manager:\n  pool:\n    - domain: gecko-t\n");
        configs.insert(&commits[0].sha, incomplete);
        configs.insert(&commits[2].sha, group_config("def5678"));
        let disk = sha(&commits[3].sha[..7]);
        let (resolver, _, _) = resolver(commits.clone(), configs);

        assert!(matches!(
            resolver.evaluate(
                &commits[0].sha,
                &key(),
                &group(),
                &sha("def5678")
            ),
            CandidateOutcome::Matched { config: None, .. }
        ));

        let resolved = resolver
            .resolve(&key(), &group(), &disk, &sha("def5678"))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.sha, commits[0].sha);
        assert_eq!(resolved.target.source_revision(), Some("def5678"));
        assert_eq!(
            resolved.target.source_organisation(),
            Some("mozilla-releng")
        );
        assert!(resolved.config.is_none());
    }

    #[test]
    fn skips_unreadable_and_foreign_configs() {
        let commits = history(5);
        let mut configs = FakeConfigs::default();
        configs.insert(&commits[0].sha, "target: [unterminated".to_string());
        configs.insert(
            &commits[1].sha,
            config_with_group("rg-west-us-gecko-1", "def5678", None),
        );
        configs.fail(&commits[2].sha);
        configs.insert(&commits[3].sha, group_config("def5678"));
        let (resolver, _, _) = resolver(commits.clone(), configs);

        // The disk image revision isn't in history, so everything is scanned.
        let resolved = resolver
            .resolve(&key(), &group(), &sha("9999999"), &sha("def5678"))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.sha, commits[3].sha);
    }

    #[test]
    fn candidate_outcomes_are_explicit() {
        let commits = history(1);
        let mut configs = FakeConfigs::default();
        configs.insert(&commits[0].sha, group_config("1111111"));
        let (resolver, _, _) = resolver(commits.clone(), configs);

        assert!(matches!(
            resolver.evaluate(
                &commits[0].sha,
                &key(),
                &group(),
                &sha("def5678")
            ),
            CandidateOutcome::Mismatch {
                deployment_id: None,
                source_revision: Some(ref s),
            } if s == "1111111"
        ));
        assert!(matches!(
            resolver.evaluate(
                &commits[0].sha,
                &key(),
                &ResourceGroup::new("rg-elsewhere").unwrap(),
                &sha("1111111"),
            ),
            CandidateOutcome::GroupNotFound
        ));
        assert!(matches!(
            resolver.evaluate("0000000", &key(), &group(), &sha("1111111")),
            CandidateOutcome::NoConfig
        ));
        assert!(matches!(
            resolver.evaluate("not-a-sha", &key(), &group(), &sha("1111111")),
            CandidateOutcome::FetchFailed(_)
        ));
    }

    #[test]
    fn ten_commit_window_without_match_resolves_to_nothing() {
        let commits = history(11);
        let mut configs = FakeConfigs::default();
        for commit in &commits {
            configs.insert(
                &commit.sha,
                config_with_group(GROUP, "1111111", Some("2222222")),
            );
        }
        let disk = sha(&commits[10].sha[..7]);
        let (resolver, _, fetched) = resolver(commits, configs);

        let resolved =
            resolver.resolve(&key(), &group(), &disk, &sha("def5678")).unwrap();
        assert!(resolved.is_none());
        assert_eq!(fetched.fetches(), 10);
    }

    #[test]
    fn repeated_resolution_is_served_from_cache() {
        let commits = history(3);
        let mut configs = FakeConfigs::default();
        configs.insert(&commits[1].sha, group_config("def5678"));
        let disk = sha(&commits[2].sha[..7]);
        let (resolver, history_source, fetched) = resolver(commits, configs);

        let first =
            resolver.resolve(&key(), &group(), &disk, &sha("def5678")).unwrap();
        let calls = (history_source.history_calls(), fetched.fetches());
        let second =
            resolver.resolve(&key(), &group(), &disk, &sha("def5678")).unwrap();

        assert_eq!(first.unwrap().sha, second.unwrap().sha);
        assert_eq!(
            (history_source.history_calls(), fetched.fetches()),
            calls
        );
    }

    #[test]
    fn history_failure_is_fatal() {
        let cache = ProvenanceCache::default();
        let lookup = CommitLookup::new(
            Arc::new(FakeCommits::failing(500)),
            cache.clone(),
        );
        let resolver = Resolver::new(
            lookup,
            Arc::new(FakeConfigs::default()),
            cache,
            RepoRef::new("o", "r").unwrap(),
        );
        let err = resolver
            .resolve(&key(), &group(), &sha("abc1234"), &sha("def5678"))
            .unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_FAILURE);
    }
}
