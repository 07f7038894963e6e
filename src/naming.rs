// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parsing of machine image and snapshot names.
//!
//! The image builder names every image and snapshot it produces
//! `<group-stem>-<key>-<disk-revision>-<bootstrap-revision>`, where both
//! revisions are seven lowercase hex digits. Anything else in a resource group
//! was not made by the builder and is left alone.

use regex::Regex;

use crate::refs::{CommitSha, ConfigKey, ResourceGroup};

/// The two revisions embedded in a resource name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevisionPair {
    /// The image-builder commit that built the disk image.
    pub disk_image: CommitSha,

    /// The bootstrap revision or deployment id applied to the machine image.
    pub bootstrap: CommitSha,
}

pub struct RevisionPattern {
    regex: Regex,
    display: String,
}

impl RevisionPattern {
    pub fn new(group: &ResourceGroup, key: &ConfigKey) -> Self {
        let regex = Regex::new(&format!(
            "^{}-{}-([a-f0-9]{{7}})-([a-f0-9]{{7}})$",
            regex::escape(group.stem()),
            regex::escape(key.as_str())
        ))
        .expect("escaped name pattern is a valid regex");

        Self {
            regex,
            display: format!(
                "{}-{}-(disk-sha)-(deployment-id)",
                group.stem(),
                key
            ),
        }
    }

    /// Extracts the revision pair from `name`, or returns `None` if the name
    /// doesn't have the builder's shape.
    pub fn extract(&self, name: &str) -> Option<RevisionPair> {
        let captures = self.regex.captures(name)?;
        let disk_image = CommitSha::new(captures.get(1)?.as_str()).ok()?;
        let bootstrap = CommitSha::new(captures.get(2)?.as_str()).ok()?;
        Some(RevisionPair { disk_image, bootstrap })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

impl std::fmt::Display for RevisionPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display)
    }
}
