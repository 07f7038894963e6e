// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scripts for publishing worker pools backed by Azure machine images and for
//! tagging those images.

use crate::{
    app::{Command, Services},
    runner::Script,
};

use self::{
    publish_pool_config::PublishPoolConfigScript,
    tag_machine_images::TagMachineImagesScript,
};

pub mod compute;
mod publish_pool_config;
mod tag_machine_images;

pub fn get_script(services: &Services, command: &Command) -> Box<dyn Script> {
    match command {
        Command::PublishPoolConfig { args } => Box::new(
            PublishPoolConfigScript::new(services.clone(), args.clone()),
        ),
        Command::TagMachineImages { args } => Box::new(
            TagMachineImagesScript::new(services.clone(), args.clone()),
        ),
    }
}
