// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Defines a script that back-annotates the machine images and snapshots in a
//! resource group with the commits and config that produced them.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{info, warn};

use crate::{
    app::{Services, TagMachineImagesArgs},
    azure::compute::{ComputeClient, ManagedResource, ResourceKind},
    github::CommitLookup,
    naming::{RevisionPair, RevisionPattern},
    refs::{ConfigKey, RepoRef, ResourceGroup},
    resolver::{Provenance, Resolver},
    runner::{Context, Script, ScriptStep},
    steps::{self, SharedCompute},
    tags::{self, BootstrapProvenance, TagSet},
};

pub struct TagMachineImagesScript {
    steps: Vec<ScriptStep>,
    services: Services,
    args: TagMachineImagesArgs,
}

impl TagMachineImagesScript {
    pub(super) fn new(services: Services, args: TagMachineImagesArgs) -> Self {
        Self { steps: get_script(&services, &args), services, args }
    }
}

impl Script for TagMachineImagesScript {
    fn steps(&self) -> &[ScriptStep] {
        self.steps.as_slice()
    }

    fn print_configuration(
        &self,
        mut w: Box<dyn std::io::Write>,
    ) -> std::io::Result<()> {
        writeln!(w, "Tagging machine images and snapshots")?;
        writeln!(w, "  resource group: {}", self.args.group)?;
        writeln!(w, "  config key: {}", self.args.key)?;
        writeln!(w, "  config repository: {}", self.services.config_repo)?;
        writeln!(
            w,
            "  name pattern: {}",
            RevisionPattern::new(&self.args.group, &self.args.key)
        )
    }

    fn check_prerequisites(&self) -> Result<(), Vec<String>> {
        match steps::taskcluster_root_url(&self.services) {
            Ok(_) => Ok(()),
            Err(e) => Err(vec![e.to_string()]),
        }
    }
}

/// How a pass over one kind of resource went.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TagSummary {
    /// Resources whose names carry builder revisions.
    pub matched: usize,

    /// Resources left alone because of their names.
    pub ignored: usize,

    /// Tagged resources whose config revision was resolved.
    pub with_provenance: usize,
}

/// Tags the builder-made resources of one resource group.
pub struct Tagger<'a> {
    pub compute: &'a dyn ComputeClient,
    pub commits: &'a CommitLookup,
    pub resolver: &'a Resolver,
    pub config_repo: &'a RepoRef,
    pub group: &'a ResourceGroup,
    pub key: &'a ConfigKey,
}

impl Tagger<'_> {
    /// Tags every resource of `kind` whose name has the builder's shape.
    /// `on_resource` is called with each resource name before it's tagged.
    pub fn tag_all(
        &self,
        kind: ResourceKind,
        mut on_resource: impl FnMut(&str),
    ) -> Result<TagSummary> {
        let pattern = RevisionPattern::new(self.group, self.key);
        let resources = self.compute.list(self.group, kind)?;
        let mut summary = TagSummary::default();

        let matching: Vec<(ManagedResource, RevisionPair)> = resources
            .into_iter()
            .filter_map(|r| {
                let revisions = pattern.extract(&r.name);
                if revisions.is_none() {
                    summary.ignored += 1;
                }
                Some((r, revisions?))
            })
            .collect();
        summary.matched = matching.len();
        info!(
            group = %self.group,
            "found {} {kind}s matching pattern {pattern}",
            matching.len()
        );

        for (resource, revisions) in &matching {
            on_resource(&resource.name);
            let tags = self
                .tag_one(kind, resource, revisions)
                .with_context(|| format!("tagging {kind} {}", resource.name))?;
            if tags.contains_key("machineImageCommitSha") {
                summary.with_provenance += 1;
            }
        }

        Ok(summary)
    }

    fn tag_one(
        &self,
        kind: ResourceKind,
        resource: &ManagedResource,
        revisions: &RevisionPair,
    ) -> Result<TagSet> {
        info!(
            "{kind}: {}, has disk image revision: {} ({})",
            resource.name, revisions.disk_image, self.config_repo
        );
        let disk_commit =
            self.commits.commit(self.config_repo, &revisions.disk_image)?;

        if resource.tags.is_empty() {
            info!("{kind} has no tags. creating tags...");
        } else {
            info!(
                tags = %tags::describe(&resource.tags),
                "{kind} has tags. updating tags..."
            );
        }

        let provenance = self.resolver.resolve(
            self.key,
            self.group,
            &revisions.disk_image,
            &revisions.bootstrap,
        )?;

        let tags = match provenance.as_deref() {
            Some(provenance) => {
                info!(
                    sha = %provenance.sha,
                    key = %self.key,
                    group = %self.group,
                    disk_image = %revisions.disk_image,
                    bootstrap = %revisions.bootstrap,
                    "machine image commit sha guessed"
                );
                self.provenance_tags(&disk_commit, provenance, revisions)?
            }
            None => {
                info!(
                    key = %self.key,
                    group = %self.group,
                    disk_image = %revisions.disk_image,
                    bootstrap = %revisions.bootstrap,
                    "failed to guess machine image commit sha. using disk \
                     image tag subset only..."
                );
                tags::assemble(&disk_commit, None)
            }
        };

        self.compute.update_tags(self.group, kind, resource, &tags)?;
        info!(tags = %tags::describe(&tags), "{kind} tags updated");
        Ok(tags)
    }

    fn provenance_tags(
        &self,
        disk_commit: &crate::github::Commit,
        provenance: &Provenance,
        revisions: &RevisionPair,
    ) -> Result<TagSet> {
        let target = &provenance.target;
        let repo = target.source_organisation().zip(target.source_repository());
        let repo = repo.and_then(|(org, repo)| RepoRef::new(org, repo).ok());
        let Some(repo) = repo else {
            warn!(
                sha = %provenance.sha,
                group = %self.group,
                "resolved config names no bootstrap repository. using disk \
                 image tag subset only..."
            );
            return Ok(tags::assemble(disk_commit, None));
        };
        let Some(config) = &provenance.config else {
            warn!(
                sha = %provenance.sha,
                "resolved config is not a complete deployment config. using \
                 disk image tag subset only..."
            );
            return Ok(tags::assemble(disk_commit, None));
        };

        info!("has bootstrap revision: {} ({repo})", revisions.bootstrap);
        let bootstrap_commit =
            self.commits.commit(&repo, &revisions.bootstrap)?;
        Ok(tags::assemble(
            disk_commit,
            Some(&BootstrapProvenance {
                deployment_id: revisions.bootstrap.as_str(),
                machine_image_sha: &provenance.sha,
                config,
                repo: &repo,
                commit: &bootstrap_commit,
            }),
        ))
    }
}

fn tag_resources(
    services: &Services,
    args: &TagMachineImagesArgs,
    kind: ResourceKind,
    ctx: &mut Context,
    ui: &crate::runner::Ui,
) -> Result<()> {
    let compute = ctx.get::<SharedCompute>(steps::COMPUTE)?;
    let tagger = Tagger {
        compute: &**compute,
        commits: ctx.get::<CommitLookup>(steps::COMMITS)?,
        resolver: ctx.get::<Resolver>(steps::RESOLVER)?,
        config_repo: &services.config_repo,
        group: &args.group,
        key: &args.key,
    };

    let summary =
        tagger.tag_all(kind, |name| ui.set_substep(name.to_string()))?;
    info!(
        matched = summary.matched,
        ignored = summary.ignored,
        with_provenance = summary.with_provenance,
        "finished tagging {kind}s"
    );
    Ok(())
}

fn get_script(
    services: &Services,
    args: &TagMachineImagesArgs,
) -> Vec<ScriptStep> {
    let services = Arc::new(services.clone());
    let args = Arc::new(args.clone());

    let mut script = Vec::new();
    let s = services.clone();
    script.push(ScriptStep::new("fetch image builder secret", move |ctx, ui| {
        steps::fetch_secret(&s, ctx, ui)
    }));
    let s = services.clone();
    script.push(ScriptStep::new("sign in to Azure", move |ctx, ui| {
        steps::connect_compute(&s, ctx, ui)
    }));
    let s = services.clone();
    script.push(ScriptStep::new("set up commit lookups", move |ctx, _| {
        steps::connect_github(&s, ctx)
    }));

    for (label, kind) in [
        ("tag machine images", ResourceKind::Image),
        ("tag snapshots", ResourceKind::Snapshot),
    ] {
        let (s, a) = (services.clone(), args.clone());
        script.push(ScriptStep::new(label, move |ctx, ui| {
            tag_resources(&s, &a, kind, ctx, ui)
        }));
    }

    script
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        cache::ProvenanceCache,
        fetch::ConfigSource,
        github::CommitSource,
        testing::{
            commit, config_with_group, FakeCommits, FakeCompute, FakeConfigs,
        },
    };

    const GROUP: &str = "rg-east-us-gecko-t";
    const DISK: &str = "abc1234";
    const BOOTSTRAP: &str = "def5678";

    struct World {
        compute: FakeCompute,
        commits: CommitLookup,
        resolver: Resolver,
        config_repo: RepoRef,
        group: ResourceGroup,
        key: ConfigKey,
    }

    impl World {
        /// A config repository whose newest commit's config names
        /// `configured` as the group's source revision, and whose disk image
        /// commit is older than that. The bootstrap repository has a commit
        /// starting with `BOOTSTRAP`.
        fn new(configured: &str) -> Self {
            let history = vec![
                commit("1111111aaaa", "newest"),
                commit("2222222bbbb", "machine image config"),
                commit(&format!("{DISK}cccc"), "disk image build\n\ndetail"),
            ];
            let mut configs = FakeConfigs::default();
            configs.insert(
                "2222222bbbb",
                config_with_group(GROUP, configured, None),
            );

            let cache = ProvenanceCache::default();
            // One fake serves both repositories: the bootstrap commit is only
            // reachable by direct lookup.
            let source: Arc<dyn CommitSource> = Arc::new(
                FakeCommits::new(history)
                    .with_archived(commit(&format!("{BOOTSTRAP}dddd"), "occ")),
            );
            let commits = CommitLookup::new(source, cache.clone());
            let configs: Arc<dyn ConfigSource> = Arc::new(configs);
            let config_repo =
                RepoRef::new("mozilla-platform-ops", "cloud-image-builder")
                    .unwrap();
            let resolver = Resolver::new(
                commits.clone(),
                configs,
                cache,
                config_repo.clone(),
            );

            Self {
                compute: FakeCompute::default(),
                commits,
                resolver,
                config_repo,
                group: ResourceGroup::new(GROUP).unwrap(),
                key: ConfigKey::new("win10-64").unwrap(),
            }
        }

        fn tagger(&self) -> Tagger<'_> {
            Tagger {
                compute: &self.compute,
                commits: &self.commits,
                resolver: &self.resolver,
                config_repo: &self.config_repo,
                group: &self.group,
                key: &self.key,
            }
        }
    }

    fn name(suffix: &str) -> String {
        format!("east-us-gecko-t-win10-64-{suffix}")
    }

    #[test]
    fn tags_only_builder_images() {
        let world = World::new(BOOTSTRAP);
        world.compute.add(
            GROUP,
            ResourceKind::Image,
            &name(&format!("{DISK}-{BOOTSTRAP}")),
            &[],
        );
        world.compute.add(
            GROUP,
            ResourceKind::Image,
            &name(&format!("{DISK}-{BOOTSTRAP}")).replace("win10", "win7"),
            &[("owner", "someone")],
        );
        world.compute.add(
            GROUP,
            ResourceKind::Image,
            &name(&format!("{DISK}-0000000")),
            &[("stale", "yes")],
        );

        let mut seen = Vec::new();
        let summary = world
            .tagger()
            .tag_all(ResourceKind::Image, |n| seen.push(n.to_string()))
            .unwrap();

        assert_eq!(
            summary,
            TagSummary { matched: 2, ignored: 1, with_provenance: 1 }
        );
        assert_eq!(seen.len(), 2);

        let updates = world.compute.updates();
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|(_, n, _)| !n.contains("win7")));

        let (_, _, full) = &updates[0];
        assert_eq!(full.len(), 18);
        assert_eq!(full["machineImageCommitSha"], "2222222bbbb");
        assert_eq!(full["bootstrapCommitSha"], format!("{BOOTSTRAP}dddd"));
        assert_eq!(full["bootstrapCommitRepo"], "OpenCloudConfig");
        assert_eq!(full["diskImageCommitMessage"], "disk image build");

        // The stale tag is replaced, not merged.
        let (_, _, subset) = &updates[1];
        assert_eq!(subset.len(), 4);
        assert!(!subset.contains_key("stale"));

        let untouched = world
            .compute
            .list(&world.group, ResourceKind::Image)
            .unwrap()
            .into_iter()
            .find(|r| r.name.contains("win7"))
            .unwrap();
        assert_eq!(untouched.tags.len(), 1);
    }

    #[test]
    fn unresolved_provenance_writes_disk_subset() {
        let world = World::new("9999999");
        world.compute.add(
            GROUP,
            ResourceKind::Snapshot,
            &name(&format!("{DISK}-{BOOTSTRAP}")),
            &[],
        );

        let summary =
            world.tagger().tag_all(ResourceKind::Snapshot, |_| {}).unwrap();
        assert_eq!(summary.with_provenance, 0);

        let updates = world.compute.updates();
        assert_eq!(updates.len(), 1);
        let (kind, _, tags) = &updates[0];
        assert_eq!(*kind, ResourceKind::Snapshot);
        assert_eq!(
            tags.keys().map(String::as_str).collect::<Vec<_>>(),
            [
                "diskImageCommitDate",
                "diskImageCommitMessage",
                "diskImageCommitSha",
                "diskImageCommitTime"
            ]
        );
    }

    #[test]
    fn incomplete_resolved_config_writes_disk_subset() {
        let mut world = World::new(BOOTSTRAP);
        let mut configs = FakeConfigs::default();
        let mut incomplete = config_with_group(GROUP, BOOTSTRAP, None);
        incomplete.push_str("manager:\n  pool:\n    - domain: gecko-t\n");
        configs.insert("2222222bbbb", incomplete);
        world.resolver = Resolver::new(
            world.commits.clone(),
            Arc::new(configs),
            ProvenanceCache::default(),
            world.config_repo.clone(),
        );
        world.compute.add(
            GROUP,
            ResourceKind::Image,
            &name(&format!("{DISK}-{BOOTSTRAP}")),
            &[],
        );

        let summary =
            world.tagger().tag_all(ResourceKind::Image, |_| {}).unwrap();
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.with_provenance, 0);

        let updates = world.compute.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].2.len(), 4);
        assert!(updates[0].2.contains_key("diskImageCommitSha"));
    }

    #[test]
    fn images_and_snapshots_share_resolutions() {
        let world = World::new(BOOTSTRAP);
        let n = name(&format!("{DISK}-{BOOTSTRAP}"));
        world.compute.add(GROUP, ResourceKind::Image, &n, &[]);
        world.compute.add(GROUP, ResourceKind::Snapshot, &n, &[]);

        let tagger = world.tagger();
        tagger.tag_all(ResourceKind::Image, |_| {}).unwrap();
        tagger.tag_all(ResourceKind::Snapshot, |_| {}).unwrap();

        let updates = world.compute.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].2, updates[1].2);
    }

    #[test]
    fn throttled_commit_lookup_aborts() {
        let mut world = World::new(BOOTSTRAP);
        world.commits = CommitLookup::new(
            Arc::new(FakeCommits::failing(403)),
            ProvenanceCache::default(),
        );
        world.compute.add(
            GROUP,
            ResourceKind::Image,
            &name(&format!("{DISK}-{BOOTSTRAP}")),
            &[],
        );

        let err =
            world.tagger().tag_all(ResourceKind::Image, |_| {}).unwrap_err();
        assert_eq!(
            crate::error::exit_code_for(&err),
            crate::error::EXIT_THROTTLED
        );
        assert!(world.compute.updates().is_empty());
    }
}
