// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! cibtool: publishes worker pools for, and tags, the Windows machine images
//! built by the cloud image builder.

use std::process::ExitCode;

use app::{App, Command, Platform};
use clap::Parser;
use colored::Colorize;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod app;
pub mod azure;
pub mod cache;
pub mod deployment;
pub mod error;
pub mod fetch;
pub mod github;
pub mod naming;
pub mod pool;
pub mod refs;
pub mod resolver;
pub mod runner;
pub mod steps;
pub mod tags;
pub mod taskcluster;
pub mod util;

#[cfg(test)]
mod testing;

fn run(app: App) -> anyhow::Result<()> {
    let interactive = match app.interactive {
        Some(val) => val,
        None => atty::is(atty::Stream::Stdout),
    };

    match (&app.platform, &app.command) {
        (Platform::Azure, command) => runner::run_script(
            azure::get_script(&app.services, command),
            interactive,
        ),
        (Platform::Unsupported(platform), Command::TagMachineImages { .. }) => {
            info!(
                "skipped image and snapshot tagging. not implemented for \
                 platform: {platform}"
            );
            Ok(())
        }
        (Platform::Unsupported(platform), Command::PublishPoolConfig {
            ..
        }) => anyhow::bail!(
            "publishing worker pools is not implemented for {platform}"
        ),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(App::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(error::exit_code_for(&e))
        }
    }
}
