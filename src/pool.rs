// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Assembly of the worker pool definition that the worker manager's Azure
//! provider consumes.

use std::collections::BTreeMap;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;

use crate::{
    azure::compute::ManagedResource,
    deployment::{DeploymentConfig, PoolDefinition, Target},
    refs::{self, RepoRef, ResourceGroup},
    util,
};

const ADMIN_USERNAME: &str = "azureuser";

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolConfig {
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub launch_configs: Vec<LaunchConfig>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    pub location: String,
    pub capacity_per_instance: u32,
    pub subnet_id: String,
    pub hardware_profile: HardwareProfile,
    pub os_profile: OsProfile,
    pub storage_profile: StorageProfile,
    pub tags: BTreeMap<String, String>,
    pub worker_config: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eviction_policy: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_profile: Option<BillingProfile>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    pub vm_size: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OsProfile {
    pub admin_username: String,
    pub admin_password: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    pub image_reference: ImageReference,
    pub os_disk: OsDisk,
}

#[derive(Clone, Debug, Serialize)]
pub struct ImageReference {
    pub id: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OsDisk {
    pub caching: &'static str,
    pub create_option: &'static str,
    pub managed_disk: ManagedDisk,
    pub os_type: &'static str,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDisk {
    pub storage_account_type: &'static str,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingProfile {
    pub max_price: i64,
}

/// The payload submitted to the worker manager.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub description: String,
    pub owner: String,
    pub email_on_error: bool,
    pub provider_id: String,
    pub config: WorkerPoolConfig,
}

/// The targets whose resource groups belong to `pool`'s domain.
pub fn pool_targets<'a>(
    config: &'a DeploymentConfig,
    pool: &PoolDefinition,
) -> Vec<&'a Target> {
    config
        .target
        .iter()
        .filter(|t| {
            ResourceGroup::new(t.group.as_str())
                .is_ok_and(|g| g.serves_domain(&pool.domain))
        })
        .collect()
}

fn launch_config(
    target: &Target,
    subscription: &str,
    image: &ManagedResource,
    spot: bool,
) -> Result<LaunchConfig> {
    let group = ResourceGroup::new(target.group.as_str())?;
    let machine = target.machine.as_ref().with_context(|| {
        format!("target {} has no machine definition", target.group)
    })?;
    let storage_account_type = match target.disk.first() {
        Some(disk) if disk.variant == "ssd" => "StandardSSD_LRS",
        _ => "Standard_LRS",
    };

    Ok(LaunchConfig {
        location: target.location(),
        capacity_per_instance: 1,
        subnet_id: refs::subnet_id(subscription, &group),
        hardware_profile: HardwareProfile {
            vm_size: util::format_vm_size(&machine.format, &machine.cpu),
        },
        os_profile: OsProfile {
            admin_username: ADMIN_USERNAME.to_string(),
            admin_password: util::generate_password(),
        },
        storage_profile: StorageProfile {
            image_reference: ImageReference { id: image.id.clone() },
            os_disk: OsDisk {
                caching: "ReadWrite",
                create_option: "FromImage",
                managed_disk: ManagedDisk { storage_account_type },
                os_type: "Windows",
            },
        },
        tags: target
            .tag
            .iter()
            .filter_map(|t| Some((t.name.clone(), t.value.clone()?)))
            .collect(),
        worker_config: BTreeMap::new(),
        priority: spot.then_some("Spot"),
        eviction_policy: spot.then_some("Deallocate"),
        billing_profile: spot.then_some(BillingProfile { max_price: -1 }),
    })
}

/// Builds the worker pool for `pool` from its targets. `images` maps resource
/// group names to the latest machine image in that group; targets without an
/// image, or outside the pool's locations, get no launch config.
pub fn worker_pool_config(
    config: &DeploymentConfig,
    pool: &PoolDefinition,
    subscription: &str,
    images: &BTreeMap<String, ManagedResource>,
) -> Result<WorkerPoolConfig> {
    let mut launch_configs = Vec::new();
    for target in pool_targets(config, pool) {
        if !pool.locations.contains(&target.location()) {
            continue;
        }

        let Some(image) = images.get(&target.group) else {
            continue;
        };

        launch_configs.push(
            launch_config(target, subscription, image, pool.is_spot())
                .with_context(|| {
                    format!("building launch config for {}", target.group)
                })?,
        );
    }

    Ok(WorkerPoolConfig {
        min_capacity: pool.capacity.minimum,
        max_capacity: pool.capacity.maximum,
        launch_configs,
    })
}

/// Renders the worker pool as pretty JSON with keys in sorted order.
pub fn to_sorted_json(pool: &WorkerPoolConfig) -> Result<String> {
    // serde_json's map type is ordered unless `preserve_order` is enabled, so
    // a round trip through `Value` sorts every object's keys.
    let value = serde_json::to_value(pool)?;
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Everything that goes into a worker pool's markdown description.
pub struct Description<'a> {
    pub platform: &'a str,
    pub key: &'a str,
    pub pool: &'a PoolDefinition,
    pub config: &'a DeploymentConfig,
    pub machine_images: &'a [ManagedResource],
    pub task_id: Option<&'a str>,
    pub taskcluster_url: &'a str,
    pub updated: DateTime<Utc>,
}

const DEFAULT_BOOTSTRAP_ORG: &str = "mozilla-releng";
const DEFAULT_BOOTSTRAP_REPO: &str = "OpenCloudConfig";

impl Description<'_> {
    /// The bootstrap revision applied to the first target in the pool's
    /// locations, and the repository it belongs to.
    fn applied_bootstrap(&self) -> Result<(RepoRef, String)> {
        let target = self
            .config
            .target
            .iter()
            .find(|t| self.pool.locations.contains(&t.location()))
            .with_context(|| {
                format!(
                    "no target in {} locations {}",
                    self.pool.id(),
                    self.pool.locations.join(", ")
                )
            })?;
        let revision = target.source_revision().with_context(|| {
            format!("target {} has no sourceRevision tag", target.group)
        })?;
        let repo = RepoRef::new(
            target.source_organisation().unwrap_or(DEFAULT_BOOTSTRAP_ORG),
            target.source_repository().unwrap_or(DEFAULT_BOOTSTRAP_REPO),
        )?;
        Ok((repo, revision.to_string()))
    }

    pub fn render(&self) -> Result<String> {
        let image = &self.config.image;
        let (bootstrap_repo, bootstrap_revision) = self.applied_bootstrap()?;
        let task_id = self.task_id.unwrap_or("<task-id>");
        let disk_image_build = self
            .machine_images
            .iter()
            .filter_map(|i| i.tags.get("diskImageCommitTime"))
            .max()
            .map(|t| util::date_part(t).to_string())
            .unwrap_or_else(|| "0000-00-00".to_string());
        let base = self.taskcluster_url.trim_end_matches('/');

        let lines = [
            format!(
                "### experimental {} taskcluster worker",
                self.pool.id()
            ),
            "#### provenance".to_string(),
            format!("- operating system: **{}**", image.os),
            format!("- os edition: **{}**", image.edition),
            format!("- source iso: **{}**", self.config.iso.file_name()),
            format!(
                "- iso wim index: **{}** ({} {})",
                self.config.iso.wimindex, image.os, image.edition
            ),
            format!("- architecture: **{}**", image.architecture),
            format!("- language: **{}**", image.language),
            format!(
                "- system timezone: **{}**",
                image.timezone.as_deref().unwrap_or("unspecified")
            ),
            "#### integration".to_string(),
            format!(
                "- disk image build: {} [{}.{}]({}/tasks/index/project.relops.\
                 cloud-image-builder.{}.{}/latest/)",
                disk_image_build,
                self.platform,
                self.key,
                base,
                self.platform,
                self.key
            ),
            "- machine image builds:".to_string(),
            self.machine_images
                .iter()
                .map(|i| format!("  - {} {}", i.location, i.name))
                .join("\n"),
            format!(
                "- applied bootstrap revision: [{}]({})",
                bootstrap_revision.chars().take(7).collect::<String>(),
                refs::commit_page_url(&bootstrap_repo, &bootstrap_revision)
            ),
            "#### deployment".to_string(),
            format!(
                "- platform: **{} ({})**",
                self.platform,
                self.pool.locations.join(", ")
            ),
            format!(
                "- last worker pool update: {} [{}]({}/tasks/{}#artifacts)",
                self.updated.format("%Y-%m-%d %H:%M"),
                task_id,
                base,
                task_id
            ),
        ];

        Ok(lines.join("\n"))
    }
}
