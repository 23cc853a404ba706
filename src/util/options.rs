// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Analysis options.

use itertools::Itertools;

use clap::error::ErrorKind;
use clap::{Arg, ArgMatches, Command};

use crate::builder::dispatch_bound::DispatchBoundMode;
use crate::heap::{HeapPolicy, ZeroXPolicy};
use crate::pta::context_strategy::ContextPolicy;
use crate::pta::{SolverKind, WorklistOrder};

const PROPTA_USAGE: &str = r#"propta [OPTIONS] INPUT [-- ENTRYPOINTS]"#;

/// Creates the clap::Command metadata for argument parsing.
fn make_options_parser() -> Command<'static> {
    Command::new("propta")
        .no_binary_name(true)
        .override_usage(PROPTA_USAGE)
        .version(env!("CARGO_PKG_VERSION"))
        .arg(Arg::new("solver")
            .long("solver")
            .takes_value(true)
            .value_parser(["standard", "pre-transitive"])
            .default_value("standard")
            .help("The fixed-point solver."))
        .arg(Arg::new("context")
            .long("context")
            .takes_value(true)
            .value_parser(["insensitive", "receiver-type", "object", "call-string", "container"])
            .default_value("insensitive")
            .help("The context policy of the analysis."))
        .arg(Arg::new("context-depth")
            .long("context-depth")
            .takes_value(true)
            .value_parser(clap::value_parser!(u32))
            .default_value("1")
            .help("The context depth limit for object and call-string sensitivity."))
        .arg(Arg::new("heap")
            .long("heap")
            .takes_value(true)
            .value_parser(["class-based", "allocation-site", "smushed", "zero-x"])
            .default_value("allocation-site")
            .help("How allocations are abstracted into heap objects."))
        .arg(Arg::new("zero-x-flags")
            .long("zero-x-flags")
            .takes_value(true)
            .multiple_values(true)
            .use_value_delimiter(true)
            .value_parser(["allocations", "smush-strings", "smush-throwables", "smush-primitive-holders", "smush-many", "constant-specific"])
            .help("The heap flags used with --heap zero-x.")
            .long_help("Comma separated. Without this option the default set is used: every flag except constant-specific."))
        .arg(Arg::new("dispatch-bound")
            .long("dispatch-bound")
            .takes_value(true)
            .value_parser(["none", "cheap", "full"])
            .default_value("cheap")
            .help("How call sites with a single possible target are detected."))
        .arg(Arg::new("worklist")
            .long("worklist")
            .takes_value(true)
            .value_parser(["fifo", "lifo"])
            .default_value("fifo")
            .hide(true)
            .help("The order variables are taken from the worklist."))
        .arg(Arg::new("no-reflection")
            .long("no-reflection")
            .takes_value(false)
            .help("Disable the allocation of objects in factory methods."))
        .arg(Arg::new("exclude")
            .long("exclude")
            .takes_value(true)
            .multiple_occurrences(true)
            .help("Regular expression over class names whose methods are never analyzed."))
        .arg(Arg::new("dump-stats")
            .long("dump-stats")
            .takes_value(false)
            .help("Dump the statistics of the analysis results."))
        .arg(Arg::new("call-graph-output")
            .long("dump-call-graph")
            .takes_value(true)
            .help("Dump the call graph in DOT format to the output file."))
        .arg(Arg::new("pts-output")
            .long("dump-pts")
            .takes_value(true)
            .help("Dump points-to results in JSON format to the output file."))
        .arg(Arg::new("INPUT")
            .help("The JSON program to be analyzed."))
}

#[derive(Clone, Debug)]
pub struct AnalysisOptions {
    pub input: Option<String>,
    /// Entry points given as `Class.selector`, overriding those of the program.
    pub entrypoints: Vec<String>,
    pub solver: SolverKind,
    pub context_policy: ContextPolicy,
    pub context_depth: usize,
    pub heap_policy: HeapPolicy,
    pub zero_x: ZeroXPolicy,
    pub dispatch_bound: DispatchBoundMode,
    pub worklist_order: WorklistOrder,
    pub reflection: bool,
    pub exclusions: Vec<String>,

    pub dump_stats: bool,
    pub call_graph_output: Option<String>,
    pub pts_output: Option<String>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            input: None,
            entrypoints: Vec::new(),
            solver: SolverKind::Standard,
            context_policy: ContextPolicy::Insensitive,
            context_depth: 1,
            heap_policy: HeapPolicy::AllocationSite,
            zero_x: ZeroXPolicy::default(),
            dispatch_bound: DispatchBoundMode::Cheap,
            worklist_order: WorklistOrder::Fifo,
            reflection: true,
            exclusions: Vec::new(),
            dump_stats: false,
            call_graph_output: None,
            pts_output: None,
        }
    }
}

impl AnalysisOptions {
    /// Parses options from a list of strings. Anything after the leftmost `--`
    /// token is taken as entry points.
    pub fn parse_from_args(&mut self, args: &[String]) -> Result<(), clap::Error> {
        let (option_args, entry_args) = match args.iter().find_position(|s| s.as_str() == "--") {
            Some((p, _)) => (&args[..p], &args[p + 1..]),
            None => (args, &args[args.len()..]),
        };
        let matches = make_options_parser().try_get_matches_from(option_args.iter())?;
        self.apply_matches(&matches);
        self.entrypoints.extend(entry_args.iter().cloned());
        Ok(())
    }

    /// Like `parse_from_args`, but prints help and usage errors and exits.
    pub fn parse_or_exit(&mut self, args: &[String]) {
        if let Err(e) = self.parse_from_args(args) {
            match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    eprintln!("{e}");
                    std::process::exit(0);
                }
                _ => e.exit(),
            }
        }
    }

    fn apply_matches(&mut self, matches: &ArgMatches) {
        self.input = matches.get_one::<String>("INPUT").cloned();

        if let Some(solver) = matches.get_one::<String>("solver") {
            self.solver = match solver.as_str() {
                "pre-transitive" => SolverKind::PreTransitive,
                _ => SolverKind::Standard,
            };
        }
        if let Some(context) = matches.get_one::<String>("context") {
            self.context_policy = match context.as_str() {
                "receiver-type" => ContextPolicy::ReceiverType,
                "object" => ContextPolicy::Object,
                "call-string" => ContextPolicy::CallString,
                "container" => ContextPolicy::Container,
                _ => ContextPolicy::Insensitive,
            };
        }
        if let Some(depth) = matches.get_one::<u32>("context-depth") {
            self.context_depth = *depth as usize;
        }
        if let Some(heap) = matches.get_one::<String>("heap") {
            self.heap_policy = match heap.as_str() {
                "class-based" => HeapPolicy::ClassBased,
                "smushed" => HeapPolicy::Smushed,
                "zero-x" => HeapPolicy::ZeroX,
                _ => HeapPolicy::AllocationSite,
            };
        }
        if let Some(flags) = matches.get_many::<String>("zero-x-flags") {
            let mut zero_x = ZeroXPolicy::none();
            for flag in flags {
                match flag.as_str() {
                    "allocations" => zero_x.allocations = true,
                    "smush-strings" => zero_x.smush_strings = true,
                    "smush-throwables" => zero_x.smush_throwables = true,
                    "smush-primitive-holders" => zero_x.smush_primitive_holders = true,
                    "smush-many" => zero_x.smush_many = true,
                    "constant-specific" => zero_x.constant_specific = true,
                    _ => unreachable!(),
                }
            }
            self.zero_x = zero_x;
        }
        if let Some(bound) = matches.get_one::<String>("dispatch-bound") {
            self.dispatch_bound = match bound.as_str() {
                "none" => DispatchBoundMode::None,
                "full" => DispatchBoundMode::Full,
                _ => DispatchBoundMode::Cheap,
            };
        }
        if let Some(order) = matches.get_one::<String>("worklist") {
            self.worklist_order = match order.as_str() {
                "lifo" => WorklistOrder::Lifo,
                _ => WorklistOrder::Fifo,
            };
        }
        self.reflection = !matches.contains_id("no-reflection");
        if let Some(patterns) = matches.get_many::<String>("exclude") {
            self.exclusions.extend(patterns.cloned());
        }

        self.dump_stats = matches.contains_id("dump-stats");
        self.call_graph_output = matches.get_one::<String>("call-graph-output").cloned();
        self.pts_output = matches.get_one::<String>("pts-output").cloned();
    }
}
