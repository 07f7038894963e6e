// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The provenance tags written onto machine images and snapshots.

use std::collections::BTreeMap;

use crate::{deployment::DeploymentConfig, github::Commit, refs::RepoRef};

pub type TagSet = BTreeMap<String, String>;

/// What is known about the bootstrap side of a machine image once its config
/// revision has been resolved.
pub struct BootstrapProvenance<'a> {
    /// The deployment id embedded in the resource name.
    pub deployment_id: &'a str,

    /// The image-builder commit guessed to have built the machine image.
    pub machine_image_sha: &'a str,

    /// The config at that commit.
    pub config: &'a DeploymentConfig,

    /// The bootstrap repository and the commit the deployment id refers to.
    pub repo: &'a RepoRef,
    pub commit: &'a Commit,
}

/// Assembles the tag set for a resource whose disk image was built at
/// `disk_image`. Without `bootstrap`, only the four disk image tags are
/// produced.
pub fn assemble(
    disk_image: &Commit,
    bootstrap: Option<&BootstrapProvenance<'_>>,
) -> TagSet {
    let mut tags = TagSet::new();
    let mut put = |k: &str, v: &str| {
        tags.insert(k.to_string(), v.to_string());
    };

    put("diskImageCommitDate", disk_image.date());
    put("diskImageCommitTime", disk_image.time());
    put("diskImageCommitSha", &disk_image.sha);
    put("diskImageCommitMessage", disk_image.summary());

    if let Some(b) = bootstrap {
        put("deploymentId", b.deployment_id);
        put("machineImageCommitSha", b.machine_image_sha);

        put("bootstrapCommitDate", b.commit.date());
        put("bootstrapCommitTime", b.commit.time());
        put("bootstrapCommitSha", &b.commit.sha);
        put("bootstrapCommitMessage", b.commit.summary());
        put("bootstrapCommitOrg", b.repo.org());
        put("bootstrapCommitRepo", b.repo.repo());

        put("isoName", b.config.iso.file_name());
        put("isoIndex", &b.config.iso.wimindex);
        put("os", &b.config.image.os);
        put("edition", &b.config.image.edition);
        put("language", &b.config.image.language);
        put("architecture", &b.config.image.architecture);
    }

    tags
}

/// Renders tags as `k: v, k: v` for log lines.
pub fn describe(tags: &TagSet) -> String {
    use itertools::Itertools;
    tags.iter().map(|(k, v)| format!("{k}: {v}")).join(", ")
}
