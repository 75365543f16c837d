//! Implementation of the `ldeploy plan` command.

use std::path::Path;

use anyhow::{Result, bail};
use owo_colors::{OwoColorize, Stream};

use layerdeploy_lib::deploy::PlanReport;

use super::{coordinator, load_config, select_units};
use crate::output::{print_error, print_json, print_stat, symbols};

pub fn cmd_plan(config_path: Option<&Path>, units: &[String], json: bool) -> Result<()> {
  let config = load_config(config_path)?;
  let selected = select_units(&config, units)?;

  let mut plans = Vec::new();
  let mut failed = 0;
  for unit in selected {
    match coordinator(&config, unit).plan(unit) {
      Ok(plan) => {
        if !json {
          print_plan(&plan);
        }
        plans.push(plan);
      }
      Err(e) => {
        failed += 1;
        print_error(&format!("{}: {} [{}]", unit.name, e, e.kind()));
      }
    }
  }

  if json {
    print_json(&plans)?;
  } else {
    let changes = plans.iter().filter(|p| p.would_apply()).count();
    println!();
    println!("{} unit(s) to apply, {} unchanged", changes, plans.len() - changes);
  }

  if failed > 0 {
    bail!("{} unit(s) could not be planned", failed);
  }
  Ok(())
}

fn print_plan(plan: &PlanReport) {
  let (symbol, summary) = if plan.diff.first_deploy {
    (
      symbols::ADD.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
      "create".to_string(),
    )
  } else if plan.would_apply() {
    (
      symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
      format!("update ({})", plan.diff.reasons().join(", ")),
    )
  } else {
    (" ".to_string(), "no changes".to_string())
  };
  println!("{} {}: {}", symbol, plan.unit, summary);

  print_stat("Code", plan.code_fingerprint.short());
  let layer = match &plan.manifest_fingerprint {
    Some(fp) if plan.layer_rebuild => format!("rebuild for manifest {}", fp.short()),
    Some(fp) => format!("cached for manifest {}", fp.short()),
    None => "none".to_string(),
  };
  print_stat("Layer", &layer);
}
