// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Script steps shared by both scripts.

use std::{rc::Rc, sync::Arc};

use anyhow::{Context as _, Result};
use tracing::info;

use crate::{
    app::Services,
    azure::compute::{AzureCompute, ComputeClient},
    cache::ProvenanceCache,
    fetch::{ConfigSource, RawContentClient},
    github::{CommitLookup, GithubClient},
    resolver::Resolver,
    runner::{Context, Ui},
    taskcluster::{ImageBuilderSecret, SecretsClient},
};

pub const SECRET: &str = "secret";
pub const COMPUTE: &str = "compute";
pub const COMMITS: &str = "commits";
pub const RESOLVER: &str = "resolver";

/// The compute client, as stored in the script context.
pub type SharedCompute = Rc<dyn ComputeClient>;

/// The config source, as stored in the script context.
pub type SharedConfigs = Arc<dyn ConfigSource>;

pub fn taskcluster_root_url(services: &Services) -> Result<&str> {
    services
        .taskcluster_root_url
        .as_deref()
        .context("no Taskcluster root URL (TASKCLUSTER_PROXY_URL) configured")
}

/// Fetches the image builder's secret into [`SECRET`].
pub fn fetch_secret(
    services: &Services,
    ctx: &mut Context,
    ui: &Ui,
) -> Result<()> {
    ui.set_substep(format!("reading {}", services.secret_name));
    let secrets = SecretsClient::new(
        taskcluster_root_url(services)?,
        services.http_timeout(),
    )?;
    let secret = secrets.get(&services.secret_name)?;
    info!(secret = %services.secret_name, "fetched secret");
    ctx.set(SECRET, secret);
    Ok(())
}

/// Signs in to Azure with the service principal from [`SECRET`] and stores
/// the client in [`COMPUTE`].
pub fn connect_compute(
    services: &Services,
    ctx: &mut Context,
    ui: &Ui,
) -> Result<()> {
    let secret = ctx.get::<ImageBuilderSecret>(SECRET)?;
    ui.set_substep(format!("subscription {}", secret.azure.subscription));
    let compute = AzureCompute::connect(&secret.azure, services.http_timeout())
        .context("signing in to Azure")?;
    info!(subscription = %secret.azure.subscription, "signed in to Azure");
    ctx.set::<SharedCompute>(COMPUTE, Rc::new(compute));
    Ok(())
}

/// Creates a reader for config documents in the config repository.
pub fn config_source(services: &Services) -> Result<SharedConfigs> {
    Ok(Arc::new(RawContentClient::new(
        services.raw_content_host.clone(),
        services.config_repo.clone(),
        services.http_timeout(),
    )?))
}

/// Creates the run's cache, the GitHub-backed commit lookup and the resolver,
/// storing them in [`COMMITS`] and [`RESOLVER`].
pub fn connect_github(services: &Services, ctx: &mut Context) -> Result<()> {
    let cache = ProvenanceCache::default();
    let github = GithubClient::new(
        services.github_api_url.clone(),
        services.github_token.clone(),
        services.commit_history_depth,
        services.http_timeout(),
    )?;
    let configs = config_source(services)?;

    let commits = CommitLookup::new(Arc::new(github), cache.clone());
    let resolver = Resolver::new(
        commits.clone(),
        configs,
        cache,
        services.config_repo.clone(),
    );

    ctx.set(COMMITS, commits);
    ctx.set(RESOLVER, resolver);
    Ok(())
}
