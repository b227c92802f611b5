use jit_rs::ir::{kinds, Graph, Symbol, TensorType, Type};
use jit_rs::symbolic::SymbolicVariable;
use jit_rs::tensor::{ScalarType, Tensor};
use std::cell::RefCell;

#[test]
fn operators_emit_aten_nodes_in_order() {
    let graph = RefCell::new(Graph::new());
    let x = SymbolicVariable::as_new_input(&graph);
    let y = SymbolicVariable::as_new_input(&graph);
    let z = (x * y + x).sigmoid();
    graph
        .borrow_mut()
        .register_output(z.value())
        .expect("register output");

    let g = graph.borrow();
    let kinds: Vec<String> = g
        .nodes()
        .map(|n| g.node(n).kind().as_str().to_string())
        .collect();
    assert_eq!(kinds, vec!["aten::mul", "aten::add", "aten::sigmoid"]);
    g.lint().expect("lint");
}

#[test]
fn elementwise_results_take_the_contiguous_type_of_the_first_operand() {
    let graph = RefCell::new(Graph::new());
    let x = SymbolicVariable::as_new_input(&graph);
    let ty = TensorType::new(ScalarType::Float, vec![2, 3], vec![1, 2]);
    graph.borrow_mut().set_value_type(x.value(), ty.clone());

    let y = x + x;
    assert_eq!(y.ty(), Type::Tensor(ty.contiguous()));

    let shaped = x.view(vec![6]);
    assert_eq!(shaped.ty(), Type::Dynamic);
}

#[test]
fn scalar_operands_become_tensor_attributes() {
    let graph = RefCell::new(Graph::new());
    let x = SymbolicVariable::as_new_input(&graph);
    let y = x * 2.0;

    let g = graph.borrow();
    let node = g.producer(y.value()).expect("producer");
    assert_eq!(g.node(node).kind(), &Symbol::aten("mul"));
    assert_eq!(g.node(node).inputs(), &[x.value()]);
    assert_eq!(
        g.node(node).attributes().t("other"),
        &Tensor::scalar(2.0, ScalarType::Double)
    );
}

#[test]
fn chunk_produces_one_value_per_chunk() {
    let graph = RefCell::new(Graph::new());
    let x = SymbolicVariable::as_new_input(&graph);
    let parts = x.chunk(3, 1);
    assert_eq!(parts.len(), 3);

    let g = graph.borrow();
    let node = g.producer(parts[0].value()).expect("producer");
    assert_eq!(g.node(node).outputs().len(), 3);
    assert_eq!(g.node(node).i("chunks"), 3);
    assert_eq!(g.node(node).i("dim"), 1);
}

#[test]
fn constants_are_recognised() {
    let graph = RefCell::new(Graph::new());
    let c = SymbolicVariable::constant(&graph, Tensor::scalar(1.0, ScalarType::Float));
    let x = SymbolicVariable::as_new_input(&graph);
    assert!(c.is_constant());
    assert!(!x.is_constant());
    let g = graph.borrow();
    let node = g.producer(c.value()).expect("producer");
    assert_eq!(g.node(node).kind(), &kinds::CONSTANT);
}

#[test]
fn mixing_graphs_is_an_error() {
    let first = RefCell::new(Graph::new());
    let second = RefCell::new(Graph::new());
    let x = SymbolicVariable::as_new_input(&first);
    let y = SymbolicVariable::as_new_input(&second);
    assert!(x.try_add(y).is_err());
}

#[test]
#[should_panic(expected = "cat requires at least one input")]
fn cat_of_nothing_panics() {
    SymbolicVariable::cat(&[], 0);
}
