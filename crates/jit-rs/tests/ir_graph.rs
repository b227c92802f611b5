use jit_rs::ir::{kinds, Graph, IrError, LintError, Symbol, Use};
use jit_rs::tensor::{ScalarType, Tensor};

fn add_node(graph: &mut Graph, lhs: jit_rs::ValueId, rhs: jit_rs::ValueId) -> jit_rs::NodeId {
    let node = graph
        .create_node(Symbol::aten("add"), &[lhs, rhs], 1)
        .expect("create add");
    graph.append_node(node)
}

#[test]
fn use_lists_mirror_node_inputs() {
    let mut graph = Graph::new();
    let x = graph.add_input();
    let y = graph.add_input();
    let add = add_node(&mut graph, x, x);
    let mul = graph
        .create_node(Symbol::aten("mul"), &[graph.node(add).output(0), y], 1)
        .expect("create mul");
    graph.append_node(mul);
    graph
        .register_output(graph.node(mul).output(0))
        .expect("register output");

    assert_eq!(
        graph.uses(x),
        &[Use { user: add, offset: 0 }, Use { user: add, offset: 1 }]
    );
    assert_eq!(graph.uses(y), &[Use { user: mul, offset: 1 }]);
    let out = graph.node(mul).output(0);
    assert_eq!(
        graph.uses(out),
        &[Use {
            user: graph.return_node(),
            offset: 0
        }]
    );
    graph.lint().expect("lint");
}

#[test]
fn destroy_requires_unused_outputs() {
    let mut graph = Graph::new();
    let x = graph.add_input();
    let add = add_node(&mut graph, x, x);
    let out = graph.node(add).output(0);
    graph.register_output(out).expect("register output");

    match graph.destroy(add) {
        Err(IrError::ValueInUse { uses, .. }) => assert_eq!(uses, 1),
        other => panic!("expected ValueInUse, got {other:?}"),
    }
    graph.erase_output(0);
    graph.destroy(add).expect("destroy unused node");
    assert!(graph.uses(x).is_empty());
    assert_eq!(graph.node_count(), 0);
    graph.lint().expect("lint after destroy");
}

#[test]
fn sentinels_cannot_be_destroyed() {
    let mut graph = Graph::new();
    let ret = graph.return_node();
    match graph.destroy(ret) {
        Err(IrError::SentinelNode { kind }) => assert_eq!(kind, kinds::RETURN),
        other => panic!("expected SentinelNode, got {other:?}"),
    }
}

#[test]
fn replace_all_uses_moves_every_use() {
    let mut graph = Graph::new();
    let x = graph.add_input();
    let y = graph.add_input();
    let add = add_node(&mut graph, x, x);
    graph.register_output(x).expect("register output");

    graph.replace_all_uses_with(x, y).expect("rauw");

    assert!(graph.uses(x).is_empty());
    assert_eq!(graph.uses(y).len(), 3);
    assert_eq!(graph.node(add).inputs(), &[y, y]);
    assert_eq!(graph.outputs(), &[y]);
    graph.lint().expect("lint after rauw");
}

#[test]
fn removing_an_input_shifts_later_uses() {
    let mut graph = Graph::new();
    let a = graph.add_input();
    let b = graph.add_input();
    let c = graph.add_input();
    let cat = graph
        .create_node(Symbol::aten("cat"), &[a, b, c], 1)
        .expect("create cat");
    graph.append_node(cat);

    graph.remove_node_input(cat, 0);

    assert_eq!(graph.node(cat).inputs(), &[b, c]);
    assert!(graph.uses(a).is_empty());
    assert_eq!(graph.uses(b), &[Use { user: cat, offset: 0 }]);
    assert_eq!(graph.uses(c), &[Use { user: cat, offset: 1 }]);
    graph.lint().expect("lint after removal");
}

#[test]
fn foreign_values_are_rejected() {
    let mut first = Graph::new();
    let mut second = Graph::new();
    let x = first.add_input();
    match second.create_node(Symbol::aten("neg"), &[x], 1) {
        Err(IrError::ForeignValue { expected, found }) => {
            assert_eq!(expected, second.id());
            assert_eq!(found, first.id());
        }
        other => panic!("expected ForeignValue, got {other:?}"),
    }
    assert_eq!(second.node_count(), 0);
}

#[test]
fn lint_is_idempotent_and_reports_uninserted_nodes() {
    let mut graph = Graph::new();
    let x = graph.add_input();
    add_node(&mut graph, x, x);
    graph.lint().expect("first lint");
    graph.lint().expect("second lint");

    graph
        .create_node(Symbol::aten("neg"), &[x], 1)
        .expect("create detached node");
    match graph.lint() {
        Err(LintError::UninsertedNode { kind }) => assert_eq!(kind, Symbol::aten("neg")),
        other => panic!("expected UninsertedNode, got {other:?}"),
    }
}

#[test]
fn names_are_unique_within_a_graph() {
    let mut graph = Graph::new();
    let a = graph.add_input();
    let b = graph.add_input();
    graph.set_value_name(a, "x").expect("name a");
    graph.set_value_name(b, "x").expect("name b");
    assert_eq!(graph.value_name(b), "x");
    assert_eq!(graph.value_name(a), "x.1");
    assert!(matches!(
        graph.set_value_name(a, "12"),
        Err(IrError::InvalidName { .. })
    ));
}

#[test]
fn constants_carry_their_tensor_and_type() {
    let mut graph = Graph::new();
    let tensor = Tensor::from_slice(&[2], &[1.5f32, 2.5]).expect("tensor");
    let node = graph.create_constant(tensor.clone());
    graph.append_node(node);
    let out = graph.node(node).output(0);

    assert_eq!(graph.node(node).kind(), &kinds::CONSTANT);
    assert_eq!(graph.node(node).attributes().t("value"), &tensor);
    let ty = graph.value_type(out).tensor().expect("tensor type");
    assert_eq!(ty.scalar_type(), ScalarType::Float);
    assert_eq!(ty.sizes(), &[2]);
}

#[test]
fn insertion_point_controls_placement() {
    let mut graph = Graph::new();
    let x = graph.add_input();
    let first = add_node(&mut graph, x, x);
    graph.set_insert_point(first);
    let neg = graph
        .create_node(Symbol::aten("neg"), &[x], 1)
        .expect("create neg");
    graph.insert_node(neg);

    assert_eq!(graph.node_ids(), vec![neg, first]);
    assert!(graph.is_before(neg, first));
    graph.lint().expect("lint");
}

#[test]
fn moving_a_node_relinks_the_sequence() {
    let mut graph = Graph::new();
    let x = graph.add_input();
    let first = add_node(&mut graph, x, x);
    let second = add_node(&mut graph, x, x);

    graph.move_before(second, first);
    assert_eq!(graph.node_ids(), vec![second, first]);
    assert!(graph.is_after(first, second));

    graph.move_after(second, first);
    assert_eq!(graph.node_ids(), vec![first, second]);
    graph.lint().expect("lint after moves");
}

#[test]
fn dead_code_elimination_keeps_outputs_and_side_effects() {
    use jit_rs::passes::{DeadCodeEliminationPass, GraphPass};

    let mut graph = Graph::new();
    let x = graph.add_input();
    let live = add_node(&mut graph, x, x);
    graph
        .register_output(graph.node(live).output(0))
        .expect("register output");
    let dead = graph
        .create_node(Symbol::aten("mul"), &[x, x], 1)
        .expect("create mul");
    graph.append_node(dead);
    let dead_out = graph.node(dead).output(0);
    add_node(&mut graph, dead_out, dead_out);
    let eval = graph.create_node(kinds::EVAL, &[x], 0).expect("create eval");
    graph.append_node(eval);

    let result = DeadCodeEliminationPass.run(&mut graph).expect("dce");
    assert!(result.changed);
    assert_eq!(result.erased_nodes, 2);
    assert_eq!(graph.node_ids(), vec![live, eval]);
    assert_eq!(graph.uses(x).len(), 3);
    graph.lint().expect("lint after dce");

    let again = DeadCodeEliminationPass.run(&mut graph).expect("dce");
    assert!(!again.changed);
}

#[test]
fn json_dump_lists_nodes_in_order() {
    let mut graph = Graph::new();
    let x = graph.add_input();
    graph.set_value_name(x, "x").expect("name");
    let add = add_node(&mut graph, x, x);
    graph
        .register_output(graph.node(add).output(0))
        .expect("register output");

    let dump = graph.to_json();
    assert_eq!(dump["inputs"][0], "x");
    let nodes = dump["nodes"].as_array().expect("nodes array");
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["kind"], "aten::add");
    assert_eq!(nodes[0]["inputs"].as_array().map(Vec::len), Some(2));
    assert_eq!(nodes[0]["stage"], 0);
}

#[test]
fn replacing_uses_across_graphs_is_rejected() {
    let mut first = Graph::new();
    let mut second = Graph::new();
    let x = first.add_input();
    let add = add_node(&mut first, x, x);
    let foreign = second.add_input();

    match first.replace_all_uses_with(x, foreign) {
        Err(IrError::ForeignValue { expected, found }) => {
            assert_eq!(expected, first.id());
            assert_eq!(found, second.id());
        }
        other => panic!("expected ForeignValue, got {other:?}"),
    }
    assert_eq!(first.node(add).inputs(), &[x, x]);
    assert_eq!(first.uses(x).len(), 2);
    first.lint().expect("lint after rejected replace");
}
