// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::{convert::Infallible, str::FromStr, time::Duration};

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

use crate::refs::{CommitSha, ConfigKey, RepoRef, ResourceGroup};

#[derive(Parser)]
#[command(version, about = "Publishes worker pools and tags machine images \
                             for the cloud image builder")]
pub struct App {
    /// The cloud platform the images were built for.
    #[arg(long, env = "platform", default_value = "azure")]
    pub platform: Platform,

    /// Forces the tool to run in an interactive or non-interactive mode. If not
    /// set, the tool infers whether to run interactively from whether it is
    /// running in an interactive terminal.
    #[arg(long, default_value = Option::None)]
    pub interactive: Option<bool>,

    #[command(flatten)]
    pub services: Services,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Platform {
    Azure,
    Unsupported(String),
}

impl FromStr for Platform {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "azure" => Self::Azure,
            other => Self::Unsupported(other.to_string()),
        })
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Azure => f.write_str("azure"),
            Self::Unsupported(name) => f.write_str(name),
        }
    }
}

/// Where the upstream services live and how to talk to them.
#[derive(Args, Clone, Debug)]
pub struct Services {
    /// The root URL of the Taskcluster deployment holding the image builder's
    /// secret and worker pools. In CI this is the task's proxy.
    #[arg(long, env = "TASKCLUSTER_PROXY_URL")]
    pub taskcluster_root_url: Option<String>,

    /// The name of the Taskcluster secret holding the Azure service principal.
    #[arg(long, default_value = "project/relops/image-builder/dev")]
    pub secret_name: String,

    /// The repository (`org/repo`) holding the deployment configs under
    /// `config/`.
    #[arg(long, default_value = "mozilla-platform-ops/cloud-image-builder")]
    pub config_repo: RepoRef,

    /// The host serving raw repository files by commit.
    #[arg(long, default_value = "https://raw.githubusercontent.com")]
    pub raw_content_host: String,

    /// The base URL of the GitHub REST API.
    #[arg(long, default_value = "https://api.github.com")]
    pub github_api_url: String,

    /// A token for the GitHub API. Unauthenticated requests are rate limited
    /// much more aggressively.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// How many of the config repository's most recent commits to consider
    /// when resolving which config built a machine image.
    #[arg(long, default_value_t = 100)]
    pub commit_history_depth: u32,

    /// The timeout, in seconds, applied to each HTTP request.
    #[arg(long, default_value_t = 30)]
    pub http_timeout_secs: u64,
}

impl Services {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Generates the worker pool definition for a pool declared in a
    /// deployment config, saves it as artifacts, and publishes it to the
    /// worker manager.
    PublishPoolConfig {
        #[command(flatten)]
        args: PublishPoolConfigArgs,
    },

    /// Tags the machine images and snapshots in a resource group with the
    /// commits and config they were built from.
    TagMachineImages {
        #[command(flatten)]
        args: TagMachineImagesArgs,
    },
}

#[derive(Args, Clone, Debug)]
pub struct PublishPoolConfigArgs {
    /// The deployment config to read, e.g. `win10-64`.
    #[arg(long, env = "key")]
    pub key: ConfigKey,

    /// The worker pool to publish, as `domain/variant`.
    #[arg(long, env = "pool")]
    pub pool: String,

    /// The config repository commit to read the deployment config from.
    #[arg(long, env = "GITHUB_HEAD_SHA")]
    pub commit_sha: CommitSha,

    /// The id of the task running this tool, linked from the pool
    /// description.
    #[arg(long, env = "TASK_ID")]
    pub task_id: Option<String>,

    /// The directory in which to save the worker pool artifacts.
    #[arg(long, default_value = "..")]
    pub artifact_dir: Utf8PathBuf,

    /// The subscription that worker subnets live in. Defaults to the
    /// subscription named in the image builder's secret.
    #[arg(long)]
    pub subscription_id: Option<String>,

    /// The Taskcluster web UI that pool descriptions link to.
    #[arg(long, default_value = "https://firefox-ci-tc.services.mozilla.com")]
    pub taskcluster_web_url: String,
}

#[derive(Args, Clone, Debug)]
pub struct TagMachineImagesArgs {
    /// The resource group whose images and snapshots should be tagged.
    #[arg(long, env = "group")]
    pub group: ResourceGroup,

    /// The deployment config the images were built from, e.g. `win10-64`.
    #[arg(long, env = "key")]
    pub key: ConfigKey,
}
