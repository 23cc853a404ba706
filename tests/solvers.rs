// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

mod common;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use test_log::test;

use common::*;
use propta::builder::dispatch_bound::DispatchBoundMode;
use propta::heap::{PointerKey, TypeFilter};
use propta::ir::{ClassDecl, ClassHierarchy, DispatchKind, Instruction, MethodDecl, MethodRef, SimpleHierarchy};
use propta::pta::context_strategy::ContextPolicy;
use propta::pta::{SolverKind, WorklistOrder};
use propta::util::options::AnalysisOptions;

const NUM_PROGRAMS: u64 = 24;
const NUM_INSTRUCTIONS: usize = 40;
/// Programs per policy combination in the cross-policy comparison.
const NUM_POLICY_PROGRAMS: u64 = 6;

/// A random straight-line `Main.main()` over two classes sharing two fields,
/// with static, virtual and final calls mixed in.
fn random_program(rng: &mut StdRng) -> (SimpleHierarchy, u32) {
    let mut body = vec![new(1, "A"), new(2, "B")];
    let mut refs: Vec<u32> = vec![1, 2];
    let mut next = 3;
    let fields = ["f", "g"];
    for _ in 0..NUM_INSTRUCTIONS {
        let pick = |rng: &mut StdRng, refs: &[u32]| *refs.choose(rng).unwrap();
        match rng.gen_range(0..8) {
            0 => {
                let ty = if rng.gen_bool(0.5) { "A" } else { "B" };
                body.push(new(next, ty));
                refs.push(next);
                next += 1;
            }
            1 => {
                let uses = (0..rng.gen_range(2..4)).map(|_| pick(rng, &refs)).collect();
                body.push(Instruction::Phi { def: next, uses });
                refs.push(next);
                next += 1;
            }
            2 | 3 => {
                let (base, val) = (pick(rng, &refs), pick(rng, &refs));
                body.push(put_field(base, "A", fields.choose(rng).unwrap(), val));
            }
            4 => {
                let base = pick(rng, &refs);
                body.push(get_field(next, base, "A", fields.choose(rng).unwrap()));
                refs.push(next);
                next += 1;
            }
            5 => {
                let arg = pick(rng, &refs);
                body.push(invoke(Some(next), next + 1, "Util", "id(Object)", DispatchKind::Static, &[arg]));
                refs.push(next);
                next += 2;
            }
            6 => {
                let receiver = pick(rng, &refs);
                body.push(invoke(Some(next), next + 1, "A", "self()", DispatchKind::Virtual, &[receiver]));
                refs.push(next);
                next += 2;
            }
            _ => {
                let (receiver, arg) = (pick(rng, &refs), pick(rng, &refs));
                body.push(invoke(Some(next), next + 1, "A", "keep(Object)", DispatchKind::Virtual, &[receiver, arg]));
                refs.push(next);
                next += 2;
            }
        }
    }
    body.push(Instruction::Return { val: None });

    let h = SimpleHierarchy::from_decls(vec![
        ClassDecl::new("A")
            .field("f", "Object")
            .field("g", "Object")
            .method(
                MethodDecl::new("self()")
                    .returns("Object")
                    .body(vec![Instruction::Return { val: Some(1) }]),
            )
            .method(keep_method()),
        ClassDecl::new("B").extends("A").method(
            MethodDecl::new("self()")
                .returns("Object")
                .body(vec![get_field(2, 1, "A", "f"), Instruction::Return { val: Some(2) }]),
        ),
        ClassDecl::new("Util").method(
            MethodDecl::new("id(Object)")
                .static_method()
                .params(&["Object"])
                .returns("Object")
                .body(vec![Instruction::Return { val: Some(1) }]),
        ),
        ClassDecl::new("Main").method(MethodDecl::new("main()").static_method().body(body)),
    ])
    .unwrap();
    (h, next)
}

/// `A.keep(Object)`: stores its argument and returns the receiver. It cannot
/// be overridden, so its call sites have a single target.
fn keep_method() -> MethodDecl {
    MethodDecl::new("keep(Object)")
        .final_method()
        .params(&["Object"])
        .returns("Object")
        .body(vec![put_field(1, "A", "g", 2), Instruction::Return { val: Some(1) }])
}

/// Points-to labels of every local of `Main.main()`.
fn main_locals(h: &SimpleHierarchy, num_values: u32, options: AnalysisOptions) -> Vec<Vec<String>> {
    let builder = analyze(h, options);
    let pa = builder.pointer_analysis();
    let main = main_node(&builder);
    (1..num_values).map(|vn| labels_of(&pa, main, vn)).collect()
}

fn with(solver: SolverKind, worklist_order: WorklistOrder) -> AnalysisOptions {
    AnalysisOptions {
        solver,
        worklist_order,
        ..AnalysisOptions::default()
    }
}

#[test]
fn worklist_order_does_not_change_results() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..NUM_PROGRAMS {
        let (h, num_values) = random_program(&mut rng);
        let fifo = main_locals(&h, num_values, with(SolverKind::Standard, WorklistOrder::Fifo));
        let lifo = main_locals(&h, num_values, with(SolverKind::Standard, WorklistOrder::Lifo));
        assert_eq!(fifo, lifo);
    }
}

#[test]
fn pre_transitive_solver_agrees_with_standard_solver() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..NUM_PROGRAMS {
        let (h, num_values) = random_program(&mut rng);
        let standard = main_locals(&h, num_values, with(SolverKind::Standard, WorklistOrder::Fifo));
        let pre_transitive = main_locals(&h, num_values, with(SolverKind::PreTransitive, WorklistOrder::Fifo));
        assert_eq!(standard, pre_transitive);
    }
}

#[test]
fn solvers_agree_under_every_context_policy_and_dispatch_bound() {
    let policies = [
        (ContextPolicy::Insensitive, 1),
        (ContextPolicy::ReceiverType, 1),
        (ContextPolicy::Object, 2),
        (ContextPolicy::CallString, 2),
        (ContextPolicy::Container, 1),
    ];
    let bounds = [DispatchBoundMode::None, DispatchBoundMode::Cheap, DispatchBoundMode::Full];
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..NUM_POLICY_PROGRAMS {
        let (h, num_values) = random_program(&mut rng);
        for (context_policy, context_depth) in policies {
            let mut unbounded = None;
            for dispatch_bound in bounds {
                let options = |solver, worklist_order| AnalysisOptions {
                    context_policy,
                    context_depth,
                    dispatch_bound,
                    ..with(solver, worklist_order)
                };
                let standard = main_locals(&h, num_values, options(SolverKind::Standard, WorklistOrder::Fifo));
                let pre_transitive = main_locals(&h, num_values, options(SolverKind::PreTransitive, WorklistOrder::Fifo));
                let lifo = main_locals(&h, num_values, options(SolverKind::Standard, WorklistOrder::Lifo));
                assert_eq!(standard, pre_transitive, "{:?} with {:?} bounds", context_policy, dispatch_bound);
                assert_eq!(standard, lifo, "{:?} with {:?} bounds", context_policy, dispatch_bound);
                // Bounding only changes how receivers are passed, not what they hold.
                match &unbounded {
                    None => unbounded = Some(standard),
                    Some(expected) => assert_eq!(expected, &standard, "{:?} with {:?} bounds", context_policy, dispatch_bound),
                }
            }
        }
    }
}

fn final_target_hierarchy() -> SimpleHierarchy {
    SimpleHierarchy::from_decls(vec![
        ClassDecl::new("A").field("g", "Object").method(keep_method()),
        ClassDecl::new("B").extends("A"),
        ClassDecl::new("C"),
        ClassDecl::new("Main").method(MethodDecl::new("main()").static_method().body(vec![
            new(1, "A"),
            new(2, "B"),
            new(3, "C"),
            Instruction::Phi { def: 4, uses: vec![1, 2, 3] },
            invoke(Some(5), 6, "A", "keep(Object)", DispatchKind::Virtual, &[4, 3]),
            Instruction::Return { val: None },
        ])),
    ])
    .unwrap()
}

#[test]
fn bounded_dispatch_passes_receivers_through_a_method_filter() {
    let h = final_target_hierarchy();
    let keep = h.lookup_method(&MethodRef::new("A", "keep(Object)")).unwrap();
    for dispatch_bound in [DispatchBoundMode::None, DispatchBoundMode::Cheap, DispatchBoundMode::Full] {
        for solver in [SolverKind::Standard, SolverKind::PreTransitive] {
            let options = AnalysisOptions {
                dispatch_bound,
                ..with(solver, WorklistOrder::Fifo)
            };
            let builder = analyze(&h, options);
            let pa = builder.pointer_analysis();
            let main = main_node(&builder);
            let keep_nodes = nodes_of(&builder, "A", "keep(Object)");
            assert_eq!(keep_nodes.len(), 1);
            let this = PointerKey::local(keep_nodes[0], 1);
            let filtered = PointerKey::typed(this.clone(), TypeFilter::TargetMethod(keep));

            // The C object never reaches `this`, whichever way it is passed.
            assert_eq!(types_of(&pa, keep_nodes[0], 1), vec!["A".to_string(), "B".to_string()]);
            assert_eq!(types_of(&pa, main, 5), vec!["A".to_string(), "B".to_string()]);
            assert!(!pa.is_filtered(&this));
            let has_filtered_edge = pa.pointer_keys().any(|k| *k == filtered);
            assert_eq!(has_filtered_edge, dispatch_bound != DispatchBoundMode::None, "{:?}", dispatch_bound);
            if has_filtered_edge {
                assert!(pa.is_filtered(&filtered));
            }
        }
    }
}

#[test]
fn mutually_recursive_final_methods_agree_across_solvers() {
    let h = SimpleHierarchy::from_decls(vec![
        ClassDecl::new("A")
            .method(
                MethodDecl::new("ping(Object)")
                    .final_method()
                    .params(&["Object"])
                    .returns("Object")
                    .body(vec![
                        invoke(Some(3), 4, "A", "pong(Object)", DispatchKind::Virtual, &[1, 2]),
                        Instruction::Phi { def: 5, uses: vec![2, 3] },
                        Instruction::Return { val: Some(5) },
                    ]),
            )
            .method(
                MethodDecl::new("pong(Object)")
                    .final_method()
                    .params(&["Object"])
                    .returns("Object")
                    .body(vec![
                        invoke(Some(3), 4, "A", "ping(Object)", DispatchKind::Virtual, &[1, 2]),
                        Instruction::Return { val: Some(3) },
                    ]),
            ),
        ClassDecl::new("B").extends("A"),
        ClassDecl::new("C"),
        ClassDecl::new("Main").method(MethodDecl::new("main()").static_method().body(vec![
            new(1, "A"),
            new(2, "B"),
            Instruction::Phi { def: 3, uses: vec![1, 2] },
            new(4, "C"),
            // Receivers held by a variable are filtered; allocations are passed one by one.
            invoke(Some(5), 6, "A", "ping(Object)", DispatchKind::Virtual, &[3, 4]),
            invoke(Some(7), 8, "A", "pong(Object)", DispatchKind::Virtual, &[1, 4]),
            invoke(Some(9), 10, "A", "ping(Object)", DispatchKind::Virtual, &[2, 1]),
            Instruction::Return { val: None },
        ])),
    ])
    .unwrap();
    let mut results = Vec::new();
    for (solver, order) in [
        (SolverKind::Standard, WorklistOrder::Fifo),
        (SolverKind::PreTransitive, WorklistOrder::Fifo),
        (SolverKind::PreTransitive, WorklistOrder::Lifo),
    ] {
        let builder = analyze(&h, options_for(solver, order));
        let pa = builder.pointer_analysis();
        let main = main_node(&builder);
        let pong = nodes_of(&builder, "A", "pong(Object)");
        assert_eq!(pong.len(), 1);
        assert_eq!(types_of(&pa, pong[0], 1), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(types_of(&pa, main, 5), vec!["A".to_string(), "C".to_string()]);
        results.push(main_locals(&h, 11, options_for(solver, order)));
    }
    assert!(results.windows(2).all(|w| w[0] == w[1]));
}

fn options_for(solver: SolverKind, worklist_order: WorklistOrder) -> AnalysisOptions {
    AnalysisOptions {
        dispatch_bound: DispatchBoundMode::Cheap,
        ..with(solver, worklist_order)
    }
}

#[test]
fn assignment_cycles_share_one_set() {
    let h = SimpleHierarchy::from_decls(vec![
        ClassDecl::new("A").field("f", "Object"),
        ClassDecl::new("Main").method(MethodDecl::new("main()").static_method().body(vec![
            new(1, "A"),
            Instruction::Phi { def: 2, uses: vec![1, 4] },
            Instruction::Phi { def: 3, uses: vec![2] },
            Instruction::Phi { def: 4, uses: vec![3] },
            put_field(1, "A", "f", 4),
            get_field(5, 2, "A", "f"),
            Instruction::Return { val: None },
        ])),
    ])
    .unwrap();
    for solver in [SolverKind::Standard, SolverKind::PreTransitive] {
        let locals = main_locals(&h, 6, with(solver, WorklistOrder::Fifo));
        assert_eq!(locals[0].len(), 1);
        for vn in 2..=5 {
            assert_eq!(locals[vn - 1], locals[0], "v{} with the {:?} solver", vn, solver);
        }
    }
}

#[test]
fn solving_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(3);
    let (h, num_values) = random_program(&mut rng);
    let mut builder = analyze(&h, AnalysisOptions::default());
    let before = {
        let pa = builder.pointer_analysis();
        let main = main_node(&builder);
        (1..num_values).map(|vn| labels_of(&pa, main, vn)).collect::<Vec<_>>()
    };
    let nodes = builder.call_graph().num_nodes();
    assert!(!builder.add_constraints_from_new_nodes().unwrap());
    builder.solve_system().unwrap();
    assert_eq!(builder.call_graph().num_nodes(), nodes);
    let pa = builder.pointer_analysis();
    let main = main_node(&builder);
    let after: Vec<_> = (1..num_values).map(|vn| labels_of(&pa, main, vn)).collect();
    assert_eq!(before, after);
}
