//! Implementation of the `ldeploy apply` command.
//!
//! Runs one convergence pass per selected unit, in order. A failing unit
//! does not stop the others; the command exits non-zero if any failed.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde_json::json;

use layerdeploy_lib::deploy::{ApplyAction, PassReport};

use super::{coordinator, load_config, select_units};
use crate::output::{format_bytes, format_duration, print_error, print_info, print_json, print_stat, print_success};

pub fn cmd_apply(config_path: Option<&Path>, units: &[String], json: bool) -> Result<()> {
  let config = load_config(config_path)?;
  let selected = select_units(&config, units)?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  let mut results = Vec::new();
  let mut failed = 0;
  for unit in selected {
    let coordinator = coordinator(&config, unit);
    let start = Instant::now();

    match rt.block_on(coordinator.run_pass(unit)) {
      Ok(report) => {
        if !json {
          print_report(&report, start.elapsed());
        }
        results.push(json!({ "unit": unit.name, "ok": true, "report": report }));
      }
      Err(e) => {
        failed += 1;
        print_error(&format!("{}: {} [{}]", unit.name, e, e.kind()));
        results.push(json!({ "unit": unit.name, "ok": false, "kind": e.kind().as_str(), "error": e.to_string() }));
      }
    }
  }

  if json {
    print_json(&results)?;
  }

  if failed > 0 {
    bail!("{} of {} unit(s) failed", failed, results.len());
  }
  Ok(())
}

fn print_report(report: &PassReport, elapsed: Duration) {
  match &report.applied {
    Some(outcome) => {
      let verb = match outcome.action {
        ApplyAction::Create => "created",
        ApplyAction::Update => "updated",
      };
      print_success(&format!("{}: {} ({})", report.unit, verb, report.diff.reasons().join(", ")));
    }
    None => print_info(&format!("{}: up to date", report.unit)),
  }

  print_stat(
    "Code",
    &format!("{} ({})", report.code.fingerprint.short(), format_bytes(report.code.size)),
  );
  match &report.layer {
    Some(layer) => {
      let how = if report.layer_built { "built" } else { "cached" };
      print_stat(
        "Layer",
        &format!("{} ({}, {})", layer.fingerprint.short(), format_bytes(layer.size), how),
      );
    }
    None => print_stat("Layer", "none"),
  }
  if let Some(state) = &report.state {
    print_stat("Serial", &state.serial.to_string());
  }
  if let Some(detail) = report.applied.as_ref().and_then(|o| o.detail.as_deref()) {
    print_stat("Target", detail);
  }
  print_stat("Time", &format_duration(elapsed));
}
