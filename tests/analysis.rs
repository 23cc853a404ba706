// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

mod common;

use std::collections::BTreeSet;

use test_log::test;

use common::*;
use propta::builder::PropagationCallGraphBuilder;
use propta::heap::{HeapPolicy, InstanceKey, PointerKey, TypeFilter};
use propta::ir::{ClassDecl, DispatchKind, Instruction, MethodDecl, MethodRef, Program, SimpleHierarchy, TypeName};
use propta::pta::context_strategy::ContextPolicy;
use propta::pta::SolverKind;
use propta::pts_set::points_to::PointsToSet;
use propta::util::cancel::CancelToken;
use propta::util::error::PtaError;
use propta::util::options::AnalysisOptions;
use propta::util::warnings::WarningKind;

fn main_class(ret: Option<&str>, body: Vec<Instruction>) -> ClassDecl {
    let main = MethodDecl::new("main()").static_method().body(body);
    let main = match ret {
        Some(ty) => main.returns(ty),
        None => main,
    };
    ClassDecl::new("Main").method(main)
}

#[test]
fn field_read_of_unwritten_field_is_empty() {
    let h = SimpleHierarchy::from_decls(vec![
        ClassDecl::new("A").field("f", "Object"),
        main_class(
            None,
            vec![
                new(1, "A"),
                Instruction::Pi { def: 2, val: 1 },
                get_field(3, 2, "A", "f"),
                Instruction::Return { val: None },
            ],
        ),
    ])
    .unwrap();
    let builder = analyze(&h, AnalysisOptions::default());
    let pa = builder.pointer_analysis();
    let main = main_node(&builder);

    let x = pa.local(main, 1);
    assert_eq!(x.count(), 1);
    assert_eq!(pa.local(main, 2), x);
    let o = x.iter().next().unwrap();
    assert!(matches!(pa.instance_key(o), InstanceKey::Allocation { pc: 0, .. }));
    assert_eq!(pa.creation_sites(o), vec![(main, 0)]);
    assert!(pa.local(main, 3).is_empty());
}

fn dispatch_hierarchy() -> SimpleHierarchy {
    SimpleHierarchy::from_decls(vec![
        ClassDecl::new("A").abstract_class().method(MethodDecl::new("m()").abstract_method()),
        ClassDecl::new("B")
            .extends("A")
            .method(MethodDecl::new("m()").body(vec![Instruction::Return { val: None }])),
        ClassDecl::new("C")
            .extends("A")
            .method(MethodDecl::new("m()").body(vec![Instruction::Return { val: None }])),
        ClassDecl::new("D").extends("B"),
        main_class(
            None,
            vec![
                new(1, "B"),
                new(2, "C"),
                new(3, "D"),
                Instruction::Phi { def: 4, uses: vec![1, 2] },
                Instruction::Phi { def: 5, uses: vec![1, 2, 3] },
                invoke(None, 6, "A", "m()", DispatchKind::Virtual, &[4]),
                invoke(None, 7, "A", "m()", DispatchKind::Virtual, &[5]),
                Instruction::Return { val: None },
            ],
        ),
    ])
    .unwrap()
}

#[test]
fn insensitive_dispatch_shares_one_node_per_method() {
    let h = dispatch_hierarchy();
    let builder = analyze(&h, AnalysisOptions::default());
    let cg = builder.call_graph();
    let main = main_node(&builder);

    let b_m = nodes_of(&builder, "B", "m()");
    let c_m = nodes_of(&builder, "C", "m()");
    assert_eq!(b_m.len(), 1);
    assert_eq!(c_m.len(), 1);
    assert_eq!(cg.num_nodes(), 3);
    for pc in [5, 6] {
        let targets: BTreeSet<_> = cg.targets(main, pc).collect();
        assert_eq!(targets, [b_m[0], c_m[0]].into_iter().collect());
    }
}

#[test]
fn receiver_type_contexts_split_nodes_by_receiver_type() {
    let h = dispatch_hierarchy();
    let options = AnalysisOptions {
        context_policy: ContextPolicy::ReceiverType,
        ..AnalysisOptions::default()
    };
    let builder = analyze(&h, options);
    let cg = builder.call_graph();
    let main = main_node(&builder);

    // B.m is reached with receivers of type B and of type D.
    assert_eq!(nodes_of(&builder, "B", "m()").len(), 2);
    assert_eq!(nodes_of(&builder, "C", "m()").len(), 1);
    assert_eq!(cg.num_nodes(), 4);

    let first: BTreeSet<_> = cg.targets(main, 5).collect();
    let second: BTreeSet<_> = cg.targets(main, 6).collect();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 3);
    assert!(first.is_subset(&second));
}

#[test]
fn handlers_catch_by_type() {
    let h = SimpleHierarchy::from_decls(vec![
        ClassDecl::new("Throwable"),
        ClassDecl::new("T1").extends("Throwable"),
        ClassDecl::new("T2").extends("Throwable"),
        ClassDecl::new("A").extends("T1"),
        main_class(
            None,
            vec![
                new(1, "A"),
                Instruction::Throw { exception: 1 },
                Instruction::Catch {
                    def: 2,
                    types: vec![TypeName::new("T1")],
                    covers: vec![1],
                },
                Instruction::Catch {
                    def: 3,
                    types: vec![TypeName::new("T2")],
                    covers: vec![1],
                },
                Instruction::Return { val: None },
            ],
        ),
    ])
    .unwrap();
    let builder = analyze(&h, AnalysisOptions::default());
    let pa = builder.pointer_analysis();
    let main = main_node(&builder);

    assert_eq!(pa.local(main, 2), pa.local(main, 1));
    assert_eq!(types_of(&pa, main, 2), vec!["A".to_string()]);
    assert!(pa.local(main, 3).is_empty());
    assert!(pa.points_to(&PointerKey::ExceptionalReturnValue { node: main }).is_empty());
}

#[test]
fn used_handlers_receive_the_exceptions_of_their_type() {
    let h = SimpleHierarchy::from_decls(vec![
        ClassDecl::new("Throwable"),
        ClassDecl::new("T1").extends("Throwable"),
        ClassDecl::new("T2").extends("Throwable"),
        ClassDecl::new("A").extends("T1"),
        main_class(
            None,
            vec![
                new(1, "A"),
                Instruction::Throw { exception: 1 },
                Instruction::Catch {
                    def: 2,
                    types: vec![TypeName::new("T1")],
                    covers: vec![1],
                },
                Instruction::Catch {
                    def: 3,
                    types: vec![TypeName::new("T2")],
                    covers: vec![1],
                },
                Instruction::Pi { def: 4, val: 2 },
                Instruction::Pi { def: 5, val: 3 },
                Instruction::Return { val: None },
            ],
        ),
    ])
    .unwrap();
    for solver in [SolverKind::Standard, SolverKind::PreTransitive] {
        let options = AnalysisOptions {
            solver,
            ..AnalysisOptions::default()
        };
        let builder = analyze(&h, options);
        let pa = builder.pointer_analysis();
        let main = main_node(&builder);

        assert!(!pa.is_implicit(&PointerKey::local(main, 2)));
        assert_eq!(types_of(&pa, main, 2), vec!["A".to_string()]);
        assert_eq!(types_of(&pa, main, 4), vec!["A".to_string()]);
        assert!(pa.local(main, 3).is_empty());
        assert!(pa.local(main, 5).is_empty());
        assert!(pa.points_to(&PointerKey::ExceptionalReturnValue { node: main }).is_empty());

        // The handler variable itself is unfiltered; its typed view is not.
        let typed = PointerKey::typed(PointerKey::local(main, 2), TypeFilter::SingleClass(class(&h, "T1")));
        assert!(pa.pointer_keys().any(|k| *k == typed));
        assert!(pa.is_filtered(&typed));
        assert!(!pa.is_filtered(&PointerKey::local(main, 2)));
    }
}

#[test]
fn uncaught_exceptions_escape_to_the_caller() {
    let h = SimpleHierarchy::from_decls(vec![
        ClassDecl::new("Throwable"),
        ClassDecl::new("E").extends("Throwable"),
        ClassDecl::new("Thrower").method(
            MethodDecl::new("fail()")
                .static_method()
                .body(vec![new(1, "E"), Instruction::Throw { exception: 1 }]),
        ),
        main_class(
            None,
            vec![
                invoke(None, 1, "Thrower", "fail()", DispatchKind::Static, &[]),
                Instruction::Catch {
                    def: 2,
                    types: vec![TypeName::new("Throwable")],
                    covers: vec![0],
                },
                Instruction::Return { val: None },
            ],
        ),
    ])
    .unwrap();
    let builder = analyze(&h, AnalysisOptions::default());
    let pa = builder.pointer_analysis();
    let main = main_node(&builder);
    let fail = nodes_of(&builder, "Thrower", "fail()")[0];

    assert_eq!(pa.points_to(&PointerKey::ExceptionalReturnValue { node: fail }).count(), 1);
    assert_eq!(types_of(&pa, main, 2), vec!["E".to_string()]);
    assert!(pa.points_to(&PointerKey::ExceptionalReturnValue { node: main }).is_empty());
}

#[test]
fn call_strings_separate_static_callers() {
    let h = SimpleHierarchy::from_decls(vec![
        ClassDecl::new("A"),
        ClassDecl::new("Util").method(
            MethodDecl::new("id(Object)")
                .static_method()
                .params(&["Object"])
                .returns("Object")
                .body(vec![Instruction::Return { val: Some(1) }]),
        ),
        main_class(
            None,
            vec![
                new(1, "A"),
                new(2, "A"),
                invoke(Some(3), 4, "Util", "id(Object)", DispatchKind::Static, &[1]),
                invoke(Some(5), 6, "Util", "id(Object)", DispatchKind::Static, &[2]),
                Instruction::Return { val: None },
            ],
        ),
    ])
    .unwrap();

    let builder = analyze(&h, AnalysisOptions::default());
    let pa = builder.pointer_analysis();
    let main = main_node(&builder);
    assert_eq!(nodes_of(&builder, "Util", "id(Object)").len(), 1);
    assert_eq!(pa.local(main, 3).count(), 2);
    assert_eq!(pa.local(main, 3), pa.local(main, 5));

    let options = AnalysisOptions {
        context_policy: ContextPolicy::CallString,
        context_depth: 1,
        ..AnalysisOptions::default()
    };
    let builder = analyze(&h, options);
    let pa = builder.pointer_analysis();
    let main = main_node(&builder);
    assert_eq!(nodes_of(&builder, "Util", "id(Object)").len(), 2);
    assert_eq!(pa.local(main, 3), pa.local(main, 1));
    assert_eq!(pa.local(main, 5), pa.local(main, 2));
}

#[test]
fn object_sensitivity_keeps_setter_calls_apart() {
    let h = SimpleHierarchy::from_decls(vec![
        ClassDecl::new("A")
            .field("f", "Object")
            .method(
                MethodDecl::new("set(Object)")
                    .params(&["Object"])
                    .body(vec![put_field(1, "A", "f", 2), Instruction::Return { val: None }]),
            )
            .method(
                MethodDecl::new("get()")
                    .returns("Object")
                    .body(vec![get_field(2, 1, "A", "f"), Instruction::Return { val: Some(2) }]),
            ),
        ClassDecl::new("B"),
        ClassDecl::new("C"),
        main_class(
            None,
            vec![
                new(1, "A"),
                new(2, "A"),
                new(3, "B"),
                new(4, "C"),
                invoke(None, 5, "A", "set(Object)", DispatchKind::Virtual, &[1, 3]),
                invoke(None, 6, "A", "set(Object)", DispatchKind::Virtual, &[2, 4]),
                invoke(Some(7), 8, "A", "get()", DispatchKind::Virtual, &[1]),
                Instruction::Return { val: None },
            ],
        ),
    ])
    .unwrap();

    let builder = analyze(&h, AnalysisOptions::default());
    let pa = builder.pointer_analysis();
    assert_eq!(types_of(&pa, main_node(&builder), 7), vec!["B".to_string(), "C".to_string()]);

    let options = AnalysisOptions {
        context_policy: ContextPolicy::Object,
        context_depth: 1,
        ..AnalysisOptions::default()
    };
    let builder = analyze(&h, options);
    let pa = builder.pointer_analysis();
    assert_eq!(types_of(&pa, main_node(&builder), 7), vec!["B".to_string()]);
    assert_eq!(nodes_of(&builder, "A", "set(Object)").len(), 2);
}

fn list_hierarchy() -> SimpleHierarchy {
    SimpleHierarchy::from_decls(vec![
        ClassDecl::new("Collection").interface(),
        ClassDecl::new("Entry")
            .field("val", "Object")
            .method(
                MethodDecl::new("set(Object)")
                    .params(&["Object"])
                    .body(vec![put_field(1, "Entry", "val", 2), Instruction::Return { val: None }]),
            )
            .method(
                MethodDecl::new("get()")
                    .returns("Object")
                    .body(vec![get_field(2, 1, "Entry", "val"), Instruction::Return { val: Some(2) }]),
            ),
        ClassDecl::new("List")
            .implements("Collection")
            .field("head", "Entry")
            .method(MethodDecl::new("add(Object)").params(&["Object"]).body(vec![
                new(3, "Entry"),
                put_field(1, "List", "head", 3),
                invoke(None, 4, "Entry", "set(Object)", DispatchKind::Virtual, &[3, 2]),
                Instruction::Return { val: None },
            ]))
            .method(MethodDecl::new("first()").returns("Object").body(vec![
                get_field(2, 1, "List", "head"),
                invoke(Some(3), 4, "Entry", "get()", DispatchKind::Virtual, &[2]),
                Instruction::Return { val: Some(3) },
            ])),
        ClassDecl::new("B"),
        ClassDecl::new("C"),
        main_class(
            None,
            vec![
                new(1, "List"),
                new(2, "List"),
                new(3, "B"),
                new(4, "C"),
                invoke(None, 5, "List", "add(Object)", DispatchKind::Virtual, &[1, 3]),
                invoke(None, 6, "List", "add(Object)", DispatchKind::Virtual, &[2, 4]),
                invoke(Some(7), 8, "List", "first()", DispatchKind::Virtual, &[1]),
                Instruction::Return { val: None },
            ],
        ),
    ])
    .unwrap()
}

#[test]
fn container_contexts_follow_objects_allocated_by_containers() {
    let h = list_hierarchy();
    let builder = analyze(&h, AnalysisOptions::default());
    let pa = builder.pointer_analysis();
    assert_eq!(types_of(&pa, main_node(&builder), 7), vec!["B".to_string(), "C".to_string()]);
    assert_eq!(nodes_of(&builder, "Entry", "set(Object)").len(), 1);

    for solver in [SolverKind::Standard, SolverKind::PreTransitive] {
        let options = AnalysisOptions {
            solver,
            context_policy: ContextPolicy::Container,
            ..AnalysisOptions::default()
        };
        let builder = analyze(&h, options);
        let pa = builder.pointer_analysis();
        assert_eq!(types_of(&pa, main_node(&builder), 7), vec!["B".to_string()]);
        assert_eq!(nodes_of(&builder, "List", "add(Object)").len(), 2);
        assert_eq!(nodes_of(&builder, "List", "first()").len(), 1);
        // Each list allocates its own entry, so entries are specialized too.
        assert_eq!(nodes_of(&builder, "Entry", "set(Object)").len(), 2);
        assert_eq!(nodes_of(&builder, "Entry", "get()").len(), 1);
    }
}

#[test]
fn casts_filter_and_arrays_hold_their_elements() {
    let h = SimpleHierarchy::from_decls(vec![
        ClassDecl::new("B"),
        ClassDecl::new("C"),
        main_class(
            Some("Object"),
            vec![
                new(1, "B"),
                new(2, "C"),
                Instruction::Phi { def: 3, uses: vec![1, 2] },
                Instruction::CheckCast {
                    def: 4,
                    val: 3,
                    ty: TypeName::new("B"),
                },
                new(5, "Object[]"),
                Instruction::ArrayStore { array: 5, val: 3 },
                Instruction::ArrayLoad { def: 6, array: 5 },
                Instruction::CheckCast {
                    def: 7,
                    val: 3,
                    ty: TypeName::new("C"),
                },
                Instruction::CheckCast {
                    def: 8,
                    val: 3,
                    ty: TypeName::new("Object"),
                },
                Instruction::Return { val: Some(4) },
            ],
        ),
    ])
    .unwrap();
    let builder = analyze(&h, AnalysisOptions::default());
    let pa = builder.pointer_analysis();
    let main = main_node(&builder);

    assert_eq!(types_of(&pa, main, 4), vec!["B".to_string()]);
    assert_eq!(types_of(&pa, main, 6), vec!["B".to_string(), "C".to_string()]);
    assert_eq!(pa.points_to(&PointerKey::ReturnValue { node: main }), pa.local(main, 4));
    assert!(pa.is_filtered(&PointerKey::local(main, 4)));
    assert!(!pa.is_filtered(&PointerKey::local(main, 3)));

    // Unused casts stay implicit but still report their filter.
    let (narrowed, widened) = (PointerKey::local(main, 7), PointerKey::local(main, 8));
    assert!(pa.is_implicit(&narrowed) && pa.is_implicit(&widened));
    assert_eq!(types_of(&pa, main, 7), vec!["C".to_string()]);
    assert!(pa.is_filtered(&narrowed));
    assert!(!pa.is_filtered(&widened));
    assert_eq!(pa.local(main, 8), pa.local(main, 3));
}

fn factory_hierarchy() -> SimpleHierarchy {
    SimpleHierarchy::from_decls(vec![
        ClassDecl::new("A").abstract_class(),
        ClassDecl::new("B").extends("A"),
        ClassDecl::new("C").extends("A"),
        ClassDecl::new("Factory").method(MethodDecl::new("create()").static_method().factory().returns("Object")),
        main_class(
            Some("Object"),
            vec![
                invoke(Some(1), 2, "Factory", "create()", DispatchKind::Static, &[]),
                Instruction::CheckCast {
                    def: 3,
                    val: 1,
                    ty: TypeName::new("A"),
                },
                Instruction::Return { val: Some(3) },
            ],
        ),
    ])
    .unwrap()
}

#[test]
fn factories_create_the_types_their_results_are_cast_to() {
    let h = factory_hierarchy();
    let builder = analyze(&h, AnalysisOptions::default());
    let pa = builder.pointer_analysis();
    assert_eq!(types_of(&pa, main_node(&builder), 3), vec!["B".to_string(), "C".to_string()]);
    assert_eq!(builder.reflection().num_factory_nodes(), 1);
    assert_eq!(builder.warnings().of_kind(WarningKind::MissingBody).count(), 0);

    let options = AnalysisOptions {
        reflection: false,
        ..AnalysisOptions::default()
    };
    let builder = analyze(&h, options);
    let pa = builder.pointer_analysis();
    assert!(pa.local(main_node(&builder), 3).is_empty());
}

#[test]
fn excluded_classes_are_not_analyzed() {
    let h = SimpleHierarchy::from_decls(vec![
        ClassDecl::new("A"),
        ClassDecl::new("lib.Util").method(
            MethodDecl::new("make()")
                .static_method()
                .returns("Object")
                .body(vec![new(1, "A"), Instruction::Return { val: Some(1) }]),
        ),
        main_class(
            Some("Object"),
            vec![
                invoke(Some(1), 2, "lib.Util", "make()", DispatchKind::Static, &[]),
                Instruction::Return { val: Some(1) },
            ],
        ),
    ])
    .unwrap();

    let builder = analyze(&h, AnalysisOptions::default());
    assert_eq!(builder.call_graph().num_nodes(), 2);
    assert_eq!(types_of(&builder.pointer_analysis(), main_node(&builder), 1), vec!["A".to_string()]);

    let options = AnalysisOptions {
        exclusions: vec!["lib\\..*".to_string()],
        ..AnalysisOptions::default()
    };
    let builder = analyze(&h, options);
    assert_eq!(builder.call_graph().num_nodes(), 1);
    assert!(builder.pointer_analysis().local(main_node(&builder), 1).is_empty());
    assert!(builder.warnings().of_kind(WarningKind::UnresolvedCallTarget).count() > 0);
}

#[test]
fn zero_x_merges_primitive_holders() {
    let h = SimpleHierarchy::from_decls(vec![
        ClassDecl::new("P").field("x", "int"),
        main_class(
            Some("Object"),
            vec![
                new(1, "P"),
                new(2, "P"),
                Instruction::Phi { def: 3, uses: vec![1, 2] },
                Instruction::Return { val: Some(3) },
            ],
        ),
    ])
    .unwrap();

    let builder = analyze(&h, AnalysisOptions::default());
    assert_eq!(builder.pointer_analysis().local(main_node(&builder), 3).count(), 2);

    let options = AnalysisOptions {
        heap_policy: HeapPolicy::ZeroX,
        ..AnalysisOptions::default()
    };
    let builder = analyze(&h, options);
    let pa = builder.pointer_analysis();
    let main = main_node(&builder);
    let merged = pa.local(main, 3);
    assert_eq!(merged.count(), 1);
    let o = merged.iter().next().unwrap();
    assert!(matches!(pa.instance_key(o), InstanceKey::ConcreteType { .. }));
    assert_eq!(pa.creation_sites(o), vec![(main, 0), (main, 1)]);
}

#[test]
fn unknown_types_are_warned_about_once() {
    let h = SimpleHierarchy::from_decls(vec![main_class(
        Some("Object"),
        vec![
            new(1, "Ghost"),
            new(2, "Ghost"),
            Instruction::Phi { def: 3, uses: vec![1, 2] },
            Instruction::Return { val: Some(3) },
        ],
    )])
    .unwrap();
    let builder = analyze(&h, AnalysisOptions::default());
    assert!(builder.pointer_analysis().local(main_node(&builder), 3).is_empty());
    assert_eq!(builder.warnings().of_kind(WarningKind::UnresolvedType).count(), 1);
}

#[test]
fn canceled_analyses_stop_with_an_error() {
    let h = dispatch_hierarchy();
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut builder = PropagationCallGraphBuilder::new(&h, AnalysisOptions::default())
        .unwrap()
        .with_cancel_token(cancel);
    let result = builder.make_call_graph(&[MethodRef::new("Main", "main()")]);
    assert!(matches!(result, Err(PtaError::Canceled)));
}

#[test]
fn programs_load_from_json() {
    let program = Program::from_json(
        r#"{
            "classes": [
                {"name": "A"},
                {"name": "Main", "methods": [
                    {"selector": "main()", "is_static": true, "ret": "Object", "body": {"instructions": [
                        {"op": "new", "def": 1, "ty": "A"},
                        {"op": "return", "val": 1}
                    ]}}
                ]}
            ],
            "entrypoints": [{"class": "Main", "selector": "main()"}]
        }"#,
    )
    .unwrap();
    let (h, entrypoints) = program.build_hierarchy().unwrap();
    let mut builder = PropagationCallGraphBuilder::new(&h, AnalysisOptions::default()).unwrap();
    builder.make_call_graph(&entrypoints).unwrap();
    let pa = builder.pointer_analysis();
    let main = main_node(&builder);
    assert_eq!(labels_of(&pa, main, 1).len(), 1);
    assert_eq!(pa.points_to(&PointerKey::ReturnValue { node: main }), pa.local(main, 1));
}
