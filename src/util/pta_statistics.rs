// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use log::*;
use std::io::{BufWriter, Write};

use crate::builder::call_graph_builder::PropagationCallGraphBuilder;
use crate::pta::propagator::operators::UnaryOp;

pub struct PtaStat<'b, 'h> {
    builder: &'b PropagationCallGraphBuilder<'h>,
}

impl<'b, 'h> PtaStat<'b, 'h> {
    pub fn new(builder: &'b PropagationCallGraphBuilder<'h>) -> Self {
        PtaStat { builder }
    }

    /// Writes the statistics to stdout.
    pub fn dump_stats(&self) -> std::io::Result<()> {
        let mut stat_writer = BufWriter::new(Box::new(std::io::stdout()) as Box<dyn Write>);
        info!("Dumping pta statistics...");
        self.write_stats(&mut stat_writer)?;
        stat_writer.flush()
    }

    pub fn write_stats<W: Write>(&self, stat_writer: &mut W) -> std::io::Result<()> {
        stat_writer.write_all("##########################################################\n".as_bytes())?;
        self.write_call_graph_stat(stat_writer)?;
        stat_writer.write_all("----------------------------------------------------------\n".as_bytes())?;
        self.write_constraint_stat(stat_writer)?;
        stat_writer.write_all("----------------------------------------------------------\n".as_bytes())?;
        self.write_pts_stat(stat_writer)?;
        stat_writer.write_all("##########################################################\n".as_bytes())?;
        Ok(())
    }

    fn write_call_graph_stat<W: Write>(&self, stat_writer: &mut W) -> std::io::Result<()> {
        let call_graph = self.builder.call_graph();
        let mut methods: Vec<_> = call_graph.nodes().map(|n| call_graph.node(n).method).collect();
        methods.sort();
        methods.dedup();
        stat_writer.write_all("Call Graph Statistics: \n".as_bytes())?;
        stat_writer.write_all(format!("#Reachable methods: {}\n", methods.len()).as_bytes())?;
        stat_writer.write_all(format!("#Call graph nodes: {}\n", call_graph.num_nodes()).as_bytes())?;
        stat_writer.write_all(format!("#Call graph edges: {}\n", call_graph.num_edges()).as_bytes())?;
        stat_writer.write_all(format!("#Contexts: {}\n", self.builder.contexts().len()).as_bytes())?;
        Ok(())
    }

    fn write_constraint_stat<W: Write>(&self, stat_writer: &mut W) -> std::io::Result<()> {
        let system = self.builder.system();
        let map = system.map();
        let graph = system.graph();
        stat_writer.write_all("Constraint Statistics: \n".as_bytes())?;
        stat_writer.write_all(format!("#Pointer keys: {}\n", map.num_keys()).as_bytes())?;
        stat_writer.write_all(format!("#Variables: {}\n", map.live_ids().count()).as_bytes())?;
        stat_writer.write_all(format!("#Implicit keys: {}\n", map.num_implicit()).as_bytes())?;
        stat_writer.write_all(format!("#Unified keys: {}\n", map.num_unified()).as_bytes())?;
        stat_writer.write_all(format!("#Root variables: {}\n", map.num_roots()).as_bytes())?;
        stat_writer.write_all(format!("#Instances: {}\n", system.num_instances()).as_bytes())?;
        for op in UnaryOp::ALL {
            stat_writer.write_all(format!("#{:?} edges: {}\n", op, graph.num_unary(op)).as_bytes())?;
        }
        stat_writer.write_all(format!("#Statements: {}\n", graph.num_statements()).as_bytes())?;
        stat_writer.write_all(format!("#Worklist steps: {}\n", system.num_steps()).as_bytes())?;
        stat_writer.write_all(format!("#Warnings: {}\n", self.builder.warnings().len()).as_bytes())?;
        Ok(())
    }

    fn write_pts_stat<W: Write>(&self, stat_writer: &mut W) -> std::io::Result<()> {
        let map = self.builder.system().map();
        let num_pointers = map.live_ids().count();
        let num_pts_relations: usize = map.live_ids().map(|id| map.var(id).count()).sum();
        let avg_pts = if num_pointers == 0 {
            0.0
        } else {
            num_pts_relations as f64 / num_pointers as f64
        };
        stat_writer.write_all("Points-to Statistics: \n".as_bytes())?;
        stat_writer.write_all(format!("#Points-to relations: {}\n", num_pts_relations).as_bytes())?;
        stat_writer.write_all(format!("#Avg points-to size: {:.2}\n", avg_pts).as_bytes())?;
        Ok(())
    }
}
