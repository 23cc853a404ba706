// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use log::*;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::builder::call_graph_builder::PropagationCallGraphBuilder;
use crate::graph::call_graph::CGNodeId;
use crate::heap::{InstanceKey, PointerKey, TypeFilter};
use crate::pta::PointerAnalysis;
use crate::pts_set::points_to::PointsToSet;
use crate::util::error::PtaResult;

#[derive(Debug, Serialize)]
pub struct PointsToEntry {
    pub pointer: String,
    pub implicit: bool,
    pub points_to: Vec<String>,
}

pub fn dump_results(builder: &PropagationCallGraphBuilder<'_>) -> PtaResult<()> {
    let options = builder.options();
    // dump points-to results
    if let Some(pts_output) = &options.pts_output {
        info!("Dumping points-to results...");
        dump_pts(&builder.pointer_analysis(), Path::new(pts_output))?;
    }

    // dump call graph
    if let Some(cg_output) = &options.call_graph_output {
        info!("Dumping call graph...");
        builder
            .call_graph()
            .to_dot(builder.hierarchy(), builder.contexts(), Path::new(cg_output))?;
    }
    Ok(())
}

/// The points-to set of every pointer key, sorted by pointer label.
pub fn points_to_entries(pa: &PointerAnalysis<'_>) -> Vec<PointsToEntry> {
    let mut entries: Vec<PointsToEntry> = pa
        .pointer_keys()
        .map(|key| {
            let mut points_to: Vec<String> =
                pa.points_to(key).iter().map(|o| instance_label(pa, pa.instance_key(o))).collect();
            points_to.sort();
            PointsToEntry {
                pointer: pointer_label(pa, key),
                implicit: pa.is_implicit(key),
                points_to,
            }
        })
        .collect();
    entries.sort_by(|a, b| a.pointer.cmp(&b.pointer));
    entries
}

pub fn dump_pts(pa: &PointerAnalysis<'_>, pts_path: &Path) -> PtaResult<()> {
    let mut pts_writer = BufWriter::new(File::create(pts_path)?);
    serde_json::to_writer_pretty(&mut pts_writer, &points_to_entries(pa))?;
    pts_writer.flush()?;
    Ok(())
}

fn node_label(pa: &PointerAnalysis<'_>, node: CGNodeId) -> String {
    pa.call_graph().node_label(pa.hierarchy(), pa.contexts(), node)
}

fn filter_label(pa: &PointerAnalysis<'_>, filter: &TypeFilter) -> String {
    let h = pa.hierarchy();
    match filter {
        TypeFilter::SingleClass(class) => h.class(*class).name.to_string(),
        TypeFilter::MultipleClasses(classes) => classes
            .iter()
            .map(|c| h.class(*c).name.to_string())
            .collect::<Vec<_>>()
            .join("|"),
        TypeFilter::SingleInstance(o) => format!("={}", instance_label(pa, pa.instance_key(*o))),
        TypeFilter::TargetMethod(m) => format!("->{}", h.method_name(*m)),
    }
}

pub fn pointer_label(pa: &PointerAnalysis<'_>, key: &PointerKey) -> String {
    let h = pa.hierarchy();
    match key {
        PointerKey::Local { node, vn } => format!("{} v{}", node_label(pa, *node), vn),
        PointerKey::ReturnValue { node } => format!("{} ret", node_label(pa, *node)),
        PointerKey::ExceptionalReturnValue { node } => format!("{} exc", node_label(pa, *node)),
        PointerKey::InstanceField { instance, field } => format!(
            "{}.{}",
            instance_label(pa, pa.instance_key(*instance)),
            h.field(*field).name
        ),
        PointerKey::StaticField { field } => {
            let field = h.field(*field);
            format!("{}.{}", h.class(field.declaring_class).name, field.name)
        }
        PointerKey::ArrayContents { instance } => format!("{}[]", instance_label(pa, pa.instance_key(*instance))),
        PointerKey::Typed { base, filter } => format!("({}) {}", filter_label(pa, filter), pointer_label(pa, base)),
    }
}

pub fn instance_label(pa: &PointerAnalysis<'_>, key: &InstanceKey) -> String {
    let h = pa.hierarchy();
    let class = &h.class(key.concrete_type()).name;
    match key {
        InstanceKey::Allocation { node, pc, .. } => format!("new {}@{} in {}", class, pc, node_label(pa, *node)),
        InstanceKey::MultiNewArray { node, pc, dim, .. } => {
            format!("new {}@{}#{} in {}", class, pc, dim, node_label(pa, *node))
        }
        InstanceKey::ConcreteType { .. } => format!("type {}", class),
        InstanceKey::SmushedAllocations { node, .. } => format!("smushed {} in {}", class, node_label(pa, *node)),
        InstanceKey::Constant { value, .. } => format!("const {} {:?}", class, value),
        InstanceKey::Pei { node, pc, .. } => format!("raised {}@{} in {}", class, pc, node_label(pa, *node)),
        InstanceKey::Metadata { described, .. } => format!("{} of {}", class, h.class(*described).name),
    }
}
