// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils;
use clap::Args as ClapArgs;
use rearcam::power::{PowerAction, PowerSequence};
use serde::Serialize;
use std::path::PathBuf;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// JSON configuration file whose enable and disable sequences are decoded
    #[arg(short, long, conflicts_with = "words")]
    config: Option<PathBuf>,

    /// Literal word array, comma or space separated (decimal or 0x hex)
    #[arg(short, long)]
    words: Option<String>,
}

#[derive(Serialize)]
struct Decoded<'a> {
    name: &'static str,
    actions: &'a PowerSequence,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    let sequences = match (&args.config, &args.words) {
        (Some(path), _) => {
            let config = utils::load_config(Some(path.as_path()))?;
            vec![
                ("enable", parse(&config.power.enable_seq)?),
                ("disable", parse(&config.power.disable_seq)?),
            ]
        }
        (None, Some(words)) => vec![("sequence", parse(&utils::parse_words(words)?)?)],
        (None, None) => {
            return Err(CliError::InvalidArgs(
                "either --config or --words is required".to_string(),
            ))
        }
    };

    if json {
        let decoded: Vec<Decoded> = sequences
            .iter()
            .map(|(name, seq)| Decoded {
                name: *name,
                actions: seq,
            })
            .collect();
        let out = serde_json::to_string_pretty(&decoded)
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
        println!("{}", out);
        return Ok(());
    }

    for (name, seq) in &sequences {
        println!("{} ({} actions)", name, seq.len());
        for (n, action) in seq.actions().iter().enumerate() {
            println!("  {}: {}", n, describe(action));
        }
    }
    Ok(())
}

fn parse(words: &[u32]) -> Result<PowerSequence, CliError> {
    let seq = PowerSequence::parse(words).map_err(rearcam::Error::from)?;
    log::debug!("Decoded {} words into {} actions", words.len(), seq.len());
    Ok(seq)
}

fn on_off(enable: bool) -> &'static str {
    if enable {
        "on"
    } else {
        "off"
    }
}

fn describe(action: &PowerAction) -> String {
    match action {
        PowerAction::Gpio { gpio, steps } => {
            let steps: Vec<String> = steps
                .iter()
                .map(|s| format!("{} ({} ms)", s.value, s.delay_ms))
                .collect();
            format!("gpio {} -> {}", gpio, steps.join(", "))
        }
        PowerAction::Pmic { enable, delay_ms } => {
            format!("pmic {} ({} ms)", on_off(*enable), delay_ms)
        }
        PowerAction::Clock { enable, delay_ms } => {
            format!("clock {} ({} ms)", on_off(*enable), delay_ms)
        }
    }
}
