// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::pta::propagator::operators::{SideEffect, Statement, UnaryOp};
use crate::pta::VarId;
use crate::pts_set::points_to::PointsToSet;

pub type StmtId = usize;

/// The edges `lhs ⊇ op(rhs)` of one unary operator, indexed both ways.
#[derive(Debug, Default)]
pub struct Relation {
    /// rhs -> lhs
    forward: HashMap<VarId, BTreeSet<VarId>>,
    /// lhs -> rhs
    backward: HashMap<VarId, BTreeSet<VarId>>,
    num_edges: usize,
}

impl Relation {
    pub fn add(&mut self, lhs: VarId, rhs: VarId) -> bool {
        if self.forward.entry(rhs).or_default().insert(lhs) {
            self.backward.entry(lhs).or_default().insert(rhs);
            self.num_edges += 1;
            true
        } else {
            false
        }
    }

    pub fn contains(&self, lhs: VarId, rhs: VarId) -> bool {
        self.forward.get(&rhs).map_or(false, |lhss| lhss.contains(&lhs))
    }

    /// Variables fed by `rhs`.
    pub fn uses(&self, rhs: VarId) -> impl Iterator<Item = VarId> + '_ {
        self.forward.get(&rhs).into_iter().flatten().copied()
    }

    /// Variables feeding `lhs`.
    pub fn defs(&self, lhs: VarId) -> impl Iterator<Item = VarId> + '_ {
        self.backward.get(&lhs).into_iter().flatten().copied()
    }

    /// All edges as `(lhs, rhs)` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (VarId, VarId)> + '_ {
        self.forward
            .iter()
            .flat_map(|(rhs, lhss)| lhss.iter().map(move |lhs| (*lhs, *rhs)))
    }

    pub fn len(&self) -> usize {
        self.num_edges
    }

    pub fn is_empty(&self) -> bool {
        self.num_edges == 0
    }

    /// Redirects every edge touching `old` to `new`. Edges that would become
    /// self-loops are dropped.
    pub fn replace(&mut self, old: VarId, new: VarId) {
        for lhs in self.forward.remove(&old).unwrap_or_default() {
            if let Some(rhss) = self.backward.get_mut(&lhs) {
                rhss.remove(&old);
            }
            self.num_edges -= 1;
            if lhs != new {
                self.add(lhs, new);
            }
        }
        for rhs in self.backward.remove(&old).unwrap_or_default() {
            if let Some(lhss) = self.forward.get_mut(&rhs) {
                lhss.remove(&old);
            }
            self.num_edges -= 1;
            if rhs != new {
                self.add(new, rhs);
            }
        }
    }
}

#[derive(Debug)]
enum StmtSlot {
    Present(Statement),
    /// Temporarily moved out for evaluation.
    Taken,
    /// Dropped as a duplicate after unification.
    Removed,
}

/// The constraint graph: implicit unary relations keyed by operator, and an
/// arena of explicit side-effect statements deduplicated by `(op, rhs)`.
#[derive(Debug, Default)]
pub struct PropagationGraph {
    implicit: BTreeMap<UnaryOp, Relation>,
    statements: Vec<StmtSlot>,
    statement_index: HashMap<(SideEffect, VarId), StmtId>,
    /// Statements by right-hand variable.
    uses: HashMap<VarId, Vec<StmtId>>,
    /// Statements by fixed operand.
    fixed: HashMap<VarId, Vec<StmtId>>,
    num_statements: usize,
}

fn push_unique(list: &mut Vec<StmtId>, id: StmtId) {
    if !list.contains(&id) {
        list.push(id);
    }
}

impl PropagationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `lhs ⊇ op(rhs)`. Returns false if the edge existed.
    pub fn add_unary(&mut self, op: UnaryOp, lhs: VarId, rhs: VarId) -> bool {
        self.implicit.entry(op).or_default().add(lhs, rhs)
    }

    pub fn relation(&self, op: UnaryOp) -> Option<&Relation> {
        self.implicit.get(&op)
    }

    /// Appends the `(op, lhs)` pairs fed by `rhs` to `out`.
    pub fn collect_unary_uses(&self, rhs: VarId, out: &mut Vec<(UnaryOp, VarId)>) {
        for (op, relation) in &self.implicit {
            out.extend(relation.uses(rhs).map(|lhs| (*op, lhs)));
        }
    }

    /// Records a side-effect statement. Returns `None` if it existed.
    pub fn add_statement(&mut self, op: SideEffect, rhs: VarId) -> Option<StmtId> {
        let id = self.statements.len();
        match self.statement_index.entry((op.clone(), rhs)) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(v) => {
                v.insert(id);
            }
        }
        push_unique(self.uses.entry(rhs).or_default(), id);
        if let Some(fixed) = op.fixed_var() {
            push_unique(self.fixed.entry(fixed).or_default(), id);
        }
        self.statements.push(StmtSlot::Present(Statement::new(op, rhs)));
        self.num_statements += 1;
        Some(id)
    }

    pub fn statements_using(&self, rhs: VarId) -> &[StmtId] {
        self.uses.get(&rhs).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn statement(&self, id: StmtId) -> Option<&Statement> {
        match &self.statements[id] {
            StmtSlot::Present(stmt) => Some(stmt),
            _ => None,
        }
    }

    /// Moves a statement out for evaluation. Returns `None` for removed ones.
    pub fn take_statement(&mut self, id: StmtId) -> Option<Statement> {
        match std::mem::replace(&mut self.statements[id], StmtSlot::Taken) {
            StmtSlot::Present(stmt) => Some(stmt),
            StmtSlot::Removed => {
                self.statements[id] = StmtSlot::Removed;
                None
            }
            StmtSlot::Taken => panic!("statement {} is already being evaluated", id),
        }
    }

    pub fn restore_statement(&mut self, id: StmtId, stmt: Statement) {
        debug_assert!(matches!(self.statements[id], StmtSlot::Taken));
        self.statements[id] = StmtSlot::Present(stmt);
    }

    pub fn statement_ids(&self) -> Vec<StmtId> {
        self.statements
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, StmtSlot::Present(_)))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn num_statements(&self) -> usize {
        self.num_statements
    }

    pub fn num_unary(&self, op: UnaryOp) -> usize {
        self.relation(op).map_or(0, Relation::len)
    }

    /// Rewrites every reference to `old` into `new` after unification.
    pub fn replace_var(&mut self, old: VarId, new: VarId) {
        for relation in self.implicit.values_mut() {
            relation.replace(old, new);
        }
        for id in self.uses.remove(&old).unwrap_or_default() {
            self.rekey(id, |stmt| stmt.rhs = new);
        }
        for id in self.fixed.remove(&old).unwrap_or_default() {
            self.rekey(id, |stmt| {
                stmt.op.replace_fixed_var(old, new);
            });
        }
    }

    fn rekey(&mut self, id: StmtId, edit: impl FnOnce(&mut Statement)) {
        let StmtSlot::Present(stmt) = &mut self.statements[id] else {
            return;
        };
        self.statement_index.remove(&(stmt.op.clone(), stmt.rhs));
        edit(stmt);
        let (op, rhs) = (stmt.op.clone(), stmt.rhs);
        match self.statement_index.entry((op.clone(), rhs)) {
            Entry::Vacant(v) => {
                v.insert(id);
                push_unique(self.uses.entry(rhs).or_default(), id);
                if let Some(fixed) = op.fixed_var() {
                    push_unique(self.fixed.entry(fixed).or_default(), id);
                }
            }
            Entry::Occupied(o) => {
                // Keep the older statement; it must still visit whatever the
                // dropped one had not seen.
                let keep = *o.get();
                if let StmtSlot::Present(dropped) = std::mem::replace(&mut self.statements[id], StmtSlot::Removed) {
                    if let StmtSlot::Present(kept) = &mut self.statements[keep] {
                        kept.prior.intersect(&dropped.prior);
                    }
                }
                self.num_statements -= 1;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::heap::InstanceId;
    use crate::ir::FieldId;
    use crate::util::bit_vec::Idx;

    fn v(i: usize) -> VarId {
        VarId::new(i)
    }

    #[test]
    fn unary_edges_are_indexed_both_ways() {
        let mut graph = PropagationGraph::new();
        assert!(graph.add_unary(UnaryOp::Assign, v(1), v(2)));
        assert!(!graph.add_unary(UnaryOp::Assign, v(1), v(2)));
        assert!(graph.add_unary(UnaryOp::Filter, v(3), v(2)));
        let mut uses = Vec::new();
        graph.collect_unary_uses(v(2), &mut uses);
        assert_eq!(uses, vec![(UnaryOp::Assign, v(1)), (UnaryOp::Filter, v(3))]);
        assert_eq!(graph.relation(UnaryOp::Assign).unwrap().defs(v(1)).collect::<Vec<_>>(), vec![v(2)]);
    }

    #[test]
    fn replace_drops_self_loops() {
        let mut relation = Relation::default();
        relation.add(v(1), v(2));
        relation.add(v(2), v(3));
        relation.add(v(4), v(1));
        relation.replace(v(2), v(1));
        assert!(!relation.contains(v(1), v(1)));
        assert!(relation.contains(v(1), v(3)));
        assert!(relation.contains(v(4), v(1)));
        assert_eq!(relation.len(), 2);
    }

    #[test]
    fn statements_are_deduplicated_after_unification() {
        let mut graph = PropagationGraph::new();
        let field = FieldId::new(0);
        let s1 = graph.add_statement(SideEffect::GetField { field, def: v(5) }, v(1)).unwrap();
        assert!(graph.add_statement(SideEffect::GetField { field, def: v(5) }, v(1)).is_none());
        let s2 = graph.add_statement(SideEffect::GetField { field, def: v(6) }, v(2)).unwrap();
        let mut taken = graph.take_statement(s1).unwrap();
        taken.prior.insert(InstanceId::new(0));
        graph.restore_statement(s1, taken);

        graph.replace_var(v(2), v(1));
        graph.replace_var(v(6), v(5));
        assert_eq!(graph.num_statements(), 1);
        assert!(graph.statement(s1).is_some() != graph.statement(s2).is_some());
        let kept = graph.statement_ids()[0];
        assert!(graph.statement(kept).unwrap().prior.is_empty());
        assert!(graph.statements_using(v(1)).contains(&kept));
    }
}
