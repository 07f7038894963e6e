// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structs, traits, and functions for defining and running a set of scripted
//! operations.

use std::{
    any::Any,
    borrow::Cow,
    collections::HashMap,
    io::{Read, Write},
};

use anyhow::Context as _;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

const PROGRESS_TICK_INTERVAL: std::time::Duration =
    std::time::Duration::from_millis(100);

type StepFn = dyn Fn(&mut Context, &Ui) -> anyhow::Result<()>;

/// A step in a scripted procedure.
pub struct ScriptStep {
    /// A descriptive label for this procedure step.
    label: &'static str,

    /// The function to execute to run this procedure step.
    func: Box<StepFn>,
}

impl ScriptStep {
    pub fn new(
        label: &'static str,
        func: impl Fn(&mut Context, &Ui) -> anyhow::Result<()> + 'static,
    ) -> Self {
        Self { label, func: Box::new(func) }
    }
}

/// Implemented by objects that can be used as scripts.
pub trait Script {
    /// Yields a slice of steps that can be executed to run this script.
    fn steps(&self) -> &[ScriptStep];

    fn print_configuration(
        &self,
        w: Box<dyn std::io::Write>,
    ) -> std::io::Result<()>;

    /// Checks that the inputs the script needs are present, returning a
    /// description of each one that isn't.
    fn check_prerequisites(&self) -> Result<(), Vec<String>>;
}

struct StepAndProgress<'a> {
    step: &'a ScriptStep,
    bar: ProgressBar,
}

/// Runs a script, pretty-printing its various labels and the outcomes of each
/// step.
pub fn run_script(
    script: Box<dyn Script>,
    interactive: bool,
) -> anyhow::Result<()> {
    script.print_configuration(Box::new(std::io::stdout()))?;
    println!();

    if let Err(e) = script.check_prerequisites() {
        let s = "Some prerequisites were not satisfied:".bold();
        println!("{}", s);

        for unsatisfied in e.iter() {
            println!("  {}", unsatisfied);
        }

        println!();
        anyhow::bail!("some script prerequisites weren't satisfied");
    }

    if interactive {
        println!("Press Enter to continue or CTRL-C to cancel.");
        std::io::stdout().flush()?;
        std::io::stdin().read(&mut [0u8])?;
    }

    let mut ctx = Context::default();
    let multi = interactive.then_some(MultiProgress::new());
    let pending = ProgressStyle::with_template("  {msg:.dim}")?;
    let succeeded = ProgressStyle::with_template("✓ {msg:.green}")?;
    let failed = ProgressStyle::with_template("⚠ {msg:.bold.red}")?;

    let steps_with_progress: Vec<StepAndProgress> = script
        .steps()
        .iter()
        .map(|step| {
            let bar = if let Some(multi) = &multi {
                multi.add(ProgressBar::new_spinner())
            } else {
                ProgressBar::new_spinner()
            };

            bar.set_message(step.label);
            bar.set_style(pending.clone());
            bar.tick();
            StepAndProgress { step, bar }
        })
        .collect();

    for step in steps_with_progress {
        step.bar.set_style(ProgressStyle::default_spinner());
        step.bar.enable_steady_tick(PROGRESS_TICK_INTERVAL);
        let ui = Ui { current_step: &step };
        match (step.step.func)(&mut ctx, &ui) {
            Ok(()) => {
                step.bar.set_message(step.step.label);
                step.bar.set_style(succeeded.clone());
                step.bar.finish();
            }
            Err(e) => {
                step.bar.set_style(failed.clone());
                step.bar.finish();
                return Err(e.context(step.step.label));
            }
        }
    }

    Ok(())
}

/// A shared script execution context, provided to each step in a running
/// script. Each context holds a store of typed values that individual steps
/// can use to pass clients and results to future steps.
#[derive(Default)]
pub struct Context {
    values: HashMap<&'static str, Box<dyn Any>>,
}

impl Context {
    /// Gets the typed value stored under `name`.
    pub fn get<T: Any>(&self, name: &str) -> anyhow::Result<&T> {
        self.values
            .get(name)
            .with_context(|| format!("context value '{name}' is not set"))?
            .downcast_ref::<T>()
            .with_context(|| {
                format!(
                    "context value '{name}' is not a {}",
                    std::any::type_name::<T>()
                )
            })
    }

    /// Stores a typed value under `name`, replacing any previous value.
    pub fn set<T: Any>(&mut self, name: &'static str, value: T) {
        self.values.insert(name, Box::new(value));
    }
}

pub struct Ui<'step, 'progress> {
    current_step: &'progress StepAndProgress<'step>,
}

impl Ui<'_, '_> {
    pub fn set_substep(&self, substep: impl Into<Cow<'static, str>>) {
        let bar = &self.current_step.bar;
        bar.set_message(format!(
            "{}: {}",
            self.current_step.step.label,
            &substep.into()
        ));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn context_stores_typed_values() {
        let mut ctx = Context::default();
        ctx.set("count", 3usize);
        assert_eq!(*ctx.get::<usize>("count").unwrap(), 3);
        assert!(ctx.get::<String>("count").is_err());
        assert!(ctx.get::<usize>("missing").is_err());
    }

    struct Counting {
        steps: Vec<ScriptStep>,
    }

    impl Script for Counting {
        fn steps(&self) -> &[ScriptStep] {
            &self.steps
        }

        fn print_configuration(
            &self,
            _w: Box<dyn std::io::Write>,
        ) -> std::io::Result<()> {
            Ok(())
        }

        fn check_prerequisites(&self) -> Result<(), Vec<String>> {
            Ok(())
        }
    }

    #[test]
    fn steps_share_context_and_stop_at_first_failure() {
        let script = Counting {
            steps: vec![
                ScriptStep::new("first", |ctx, _| {
                    ctx.set("n", 1u32);
                    Ok(())
                }),
                ScriptStep::new("second", |ctx, ui| {
                    ui.set_substep("checking");
                    anyhow::ensure!(*ctx.get::<u32>("n")? == 1);
                    anyhow::bail!("boom")
                }),
                ScriptStep::new("third", |_, _| panic!("must not run")),
            ],
        };

        let err = run_script(Box::new(script), false).unwrap_err();
        assert_eq!(err.to_string(), "second");
        assert_eq!(err.root_cause().to_string(), "boom");
    }
}
