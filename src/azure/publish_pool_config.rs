// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Defines a script that turns a worker pool declared in a deployment config
//! into an Azure worker pool definition and publishes it to the worker
//! manager.

use std::{collections::BTreeMap, fs, sync::Arc};

use anyhow::{Context as _, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use tracing::info;

use crate::{
    app::{PublishPoolConfigArgs, Services},
    azure::compute::{self, ComputeClient, ManagedResource, ResourceKind},
    deployment::{DeploymentConfig, PoolDefinition},
    naming::RevisionPattern,
    pool::{self, Description, ProviderConfig, WorkerPoolConfig},
    refs::{ConfigKey, ResourceGroup},
    runner::{Context, Script, ScriptStep, Ui},
    steps::{self, SharedCompute, SharedConfigs},
    taskcluster::{ImageBuilderSecret, TaskclusterWorkerManager, WorkerManager},
    util,
};

const CONFIG: &str = "config";
const IMAGES: &str = "images";
const PROVIDER_CONFIG: &str = "provider_config";

pub struct PublishPoolConfigScript {
    steps: Vec<ScriptStep>,
    services: Services,
    args: PublishPoolConfigArgs,
}

impl PublishPoolConfigScript {
    pub(super) fn new(services: Services, args: PublishPoolConfigArgs) -> Self {
        Self { steps: get_script(&services, &args), services, args }
    }
}

impl Script for PublishPoolConfigScript {
    fn steps(&self) -> &[ScriptStep] {
        self.steps.as_slice()
    }

    fn print_configuration(
        &self,
        mut w: Box<dyn std::io::Write>,
    ) -> std::io::Result<()> {
        writeln!(w, "Publishing worker pool {}", self.args.pool)?;
        writeln!(w, "  config key: {}", self.args.key)?;
        writeln!(
            w,
            "  config revision: {} ({})",
            self.args.commit_sha, self.services.config_repo
        )?;
        writeln!(w, "  artifact directory: {}", self.args.artifact_dir)
    }

    fn check_prerequisites(&self) -> Result<(), Vec<String>> {
        let mut unsatisfied = Vec::new();
        if let Err(e) = steps::taskcluster_root_url(&self.services) {
            unsatisfied.push(e.to_string());
        }

        if !self.args.artifact_dir.is_dir() {
            unsatisfied.push(format!(
                "artifact directory {} does not exist",
                self.args.artifact_dir
            ));
        }

        if !self.args.pool.contains('/') {
            unsatisfied.push(format!(
                "worker pool id {} is not of the form domain/variant",
                self.args.pool
            ));
        }

        if unsatisfied.is_empty() {
            Ok(())
        } else {
            Err(unsatisfied)
        }
    }
}

fn fetch_config(
    services: &Services,
    args: &PublishPoolConfigArgs,
    ctx: &mut Context,
    ui: &Ui,
) -> Result<()> {
    let configs: SharedConfigs = steps::config_source(services)?;
    let url = configs.describe(&args.commit_sha, &args.key);
    ui.set_substep(url.clone());

    let document = configs
        .fetch(&args.commit_sha, &args.key)?
        .with_context(|| format!("no deployment config at {url}"))?;
    let config = DeploymentConfig::parse(&document)
        .with_context(|| format!("parsing deployment config {url}"))?;
    if config.pool(&args.pool).is_none() {
        anyhow::bail!("{url} declares no worker pool {}", args.pool);
    }

    ctx.set(CONFIG, config);
    Ok(())
}

/// Finds the latest builder-made image in each resource group serving
/// `pool`, keyed by group name. Groups without one are left out.
pub fn latest_images(
    compute: &dyn ComputeClient,
    config: &DeploymentConfig,
    pool: &PoolDefinition,
    key: &ConfigKey,
) -> Result<BTreeMap<String, ManagedResource>> {
    let mut latest = BTreeMap::new();
    for target in pool::pool_targets(config, pool) {
        let group = ResourceGroup::new(target.group.as_str())?;
        let pattern = RevisionPattern::new(&group, key);
        let images = compute.list(&group, ResourceKind::Image)?;
        let count = images.iter().filter(|i| pattern.matches(&i.name)).count();
        info!("found {count} {key} images in {group}");

        if let Some(image) =
            compute::latest_image(&images, |name| pattern.matches(name))
        {
            info!("latest image: {} ({})", image.name, image.id);
            latest.insert(target.group.clone(), image.clone());
        }
    }

    Ok(latest)
}

fn find_images(
    args: &PublishPoolConfigArgs,
    ctx: &mut Context,
    ui: &Ui,
) -> Result<()> {
    let compute = ctx.get::<SharedCompute>(steps::COMPUTE)?;
    let config = ctx.get::<DeploymentConfig>(CONFIG)?;
    let pool = config
        .pool(&args.pool)
        .with_context(|| format!("no worker pool {}", args.pool))?;

    ui.set_substep(format!("{} resource groups", pool.domain));
    let images = latest_images(&**compute, config, pool, &args.key)?;
    ctx.set(IMAGES, images);
    Ok(())
}

/// Saves the worker pool as `<stem>.json` and the provider payload as
/// `<stem>.yaml` in `dir`, returning both paths.
pub fn write_artifacts(
    dir: &Utf8Path,
    pool_id: &str,
    provider_config: &ProviderConfig,
) -> Result<(Utf8PathBuf, Utf8PathBuf)> {
    let stem = util::artifact_stem(pool_id);
    let json_path = dir.join(format!("{stem}.json"));
    let yaml_path = dir.join(format!("{stem}.yaml"));

    fs::write(&json_path, pool::to_sorted_json(&provider_config.config)?)
        .with_context(|| format!("writing {json_path}"))?;
    info!("saving: {json_path}");

    fs::write(&yaml_path, serde_yaml::to_string(provider_config)?)
        .with_context(|| format!("writing {yaml_path}"))?;
    info!("saving: {yaml_path}");

    Ok((json_path, yaml_path))
}

fn build_provider_config(
    args: &PublishPoolConfigArgs,
    platform: &str,
    ctx: &mut Context,
    ui: &Ui,
) -> Result<()> {
    let secret = ctx.get::<ImageBuilderSecret>(steps::SECRET)?;
    let config = ctx.get::<DeploymentConfig>(CONFIG)?;
    let images = ctx.get::<BTreeMap<String, ManagedResource>>(IMAGES)?;
    let pool = config
        .pool(&args.pool)
        .with_context(|| format!("no worker pool {}", args.pool))?;
    let subscription = args
        .subscription_id
        .as_deref()
        .unwrap_or(&secret.azure.subscription);

    let worker_pool: WorkerPoolConfig =
        pool::worker_pool_config(config, pool, subscription, images)?;
    info!(
        launch_configs = worker_pool.launch_configs.len(),
        "assembled worker pool {}",
        args.pool
    );

    let machine_images: Vec<ManagedResource> =
        images.values().cloned().collect();
    let description = Description {
        platform,
        key: args.key.as_str(),
        pool,
        config,
        machine_images: &machine_images,
        task_id: args.task_id.as_deref(),
        taskcluster_url: &args.taskcluster_web_url,
        updated: Utc::now(),
    }
    .render()?;

    let provider_config = ProviderConfig {
        description,
        owner: pool.owner.clone(),
        email_on_error: true,
        provider_id: pool.provider.clone(),
        config: worker_pool,
    };

    ui.set_substep(format!("saving to {}", args.artifact_dir));
    write_artifacts(&args.artifact_dir, &args.pool, &provider_config)?;
    ctx.set(PROVIDER_CONFIG, provider_config);
    Ok(())
}

/// Pushes the provider payload built by an earlier step to `manager`.
pub fn publish(
    manager: &dyn WorkerManager,
    pool_id: &str,
    ctx: &Context,
) -> Result<()> {
    let provider_config = ctx.get::<ProviderConfig>(PROVIDER_CONFIG)?;
    manager.create_or_update_worker_pool(pool_id, provider_config)
}

fn get_script(
    services: &Services,
    args: &PublishPoolConfigArgs,
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
    let (s, a) = (services.clone(), args.clone());
    script.push(ScriptStep::new("fetch deployment config", move |ctx, ui| {
        fetch_config(&s, &a, ctx, ui)
    }));
    let a = args.clone();
    script.push(ScriptStep::new("find latest machine images", move |ctx, ui| {
        find_images(&a, ctx, ui)
    }));
    let a = args.clone();
    script.push(ScriptStep::new(
        "write worker pool artifacts",
        move |ctx, ui| build_provider_config(&a, "azure", ctx, ui),
    ));
    let (s, a) = (services, args);
    script.push(ScriptStep::new("publish worker pool", move |ctx, ui| {
        ui.set_substep(a.pool.clone());
        let manager = TaskclusterWorkerManager::new(
            steps::taskcluster_root_url(&s)?,
            s.http_timeout(),
        )?;
        publish(&manager, &a.pool, ctx)
    }));

    script
}
