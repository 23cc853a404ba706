// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The main routine of `propta`.
//!
//! Loads a JSON program, builds its call graph together with the points-to
//! sets of its pointers, and dumps whatever the options ask for.

use anyhow::{anyhow, Context, Result};
use log::*;
use std::env;

use propta::builder::PropagationCallGraphBuilder;
use propta::ir::{MethodRef, Program};
use propta::util::options::AnalysisOptions;
use propta::util::pta_statistics::PtaStat;
use propta::util::results_dumper;

/// Splits `Class.selector` at the last dot before the parameter list.
fn parse_entrypoint(entry: &str) -> Result<MethodRef> {
    let head = entry.find('(').map_or(entry, |p| &entry[..p]);
    let dot = head
        .rfind('.')
        .ok_or_else(|| anyhow!("entrypoint `{}` is not of the form Class.selector", entry))?;
    Ok(MethodRef::new(&entry[..dot], &entry[dot + 1..]))
}

fn main() -> Result<()> {
    if env::var("PROPTA_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("PROPTA_LOG")
            .write_style("PROPTA_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    let mut options = AnalysisOptions::default();
    let args: Vec<String> = env::args().skip(1).collect();
    options.parse_or_exit(&args);
    info!("PTA Options: {:?}", options);

    let input = options
        .input
        .clone()
        .ok_or_else(|| anyhow!("no input program given"))?;
    let program = Program::from_file(&input).with_context(|| format!("failed to load {}", input))?;
    let (hierarchy, mut entrypoints) = program.build_hierarchy()?;
    if !options.entrypoints.is_empty() {
        entrypoints = options
            .entrypoints
            .iter()
            .map(|entry| parse_entrypoint(entry))
            .collect::<Result<_>>()?;
    }

    let dump_stats = options.dump_stats;
    let mut builder = PropagationCallGraphBuilder::new(&hierarchy, options)?;
    builder.make_call_graph(&entrypoints)?;

    results_dumper::dump_results(&builder)?;
    if dump_stats {
        PtaStat::new(&builder).dump_stats()?;
    }
    for warning in builder.warnings().iter() {
        debug!("{}", warning);
    }
    Ok(())
}
