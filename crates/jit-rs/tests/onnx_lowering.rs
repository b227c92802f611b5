use jit_rs::ir::{kinds, Graph, HostOp, Symbol, ValueId};
use jit_rs::passes::onnx::{SymbolicOutputs, SymbolicRegistry};
use jit_rs::passes::{global_registry, to_onnx, SymbolicContext};
use jit_rs::script::{builtin_resolver, define_module_methods, Module};
use jit_rs::symbolic::SymbolicVariable;
use jit_rs::tensor::Tensor;
use jit_rs::tracer::{self, TraceInput, Variable};
use std::cell::RefCell;
use std::sync::Arc;

fn kinds_of(graph: &Graph) -> Vec<String> {
    graph
        .nodes()
        .map(|n| graph.node(n).kind().as_str().to_string())
        .collect()
}

fn sample_graph() -> Graph {
    let graph = RefCell::new(Graph::new());
    let x = SymbolicVariable::as_new_input(&graph);
    let y = SymbolicVariable::as_new_input(&graph);
    let z = (x * y + x).sigmoid();
    graph
        .borrow_mut()
        .register_output(z.value())
        .expect("register output");
    graph.into_inner()
}

#[test]
fn builtin_symbolics_lower_aten_ops() {
    let graph = sample_graph();
    let (lowered, env) = to_onnx(&graph, global_registry()).expect("lower");
    lowered.lint().expect("lint");
    assert_eq!(
        kinds_of(&lowered),
        vec!["onnx::Mul", "onnx::Add", "onnx::Sigmoid"]
    );
    assert_eq!(lowered.inputs().len(), 2);
    assert_eq!(lowered.outputs().len(), 1);
    assert_eq!(
        env.get(&graph.outputs()[0]).copied().flatten(),
        Some(lowered.outputs()[0])
    );
}

#[test]
fn registered_hooks_override_builtins() {
    let registry = SymbolicRegistry::new();
    registry.register(
        "aten::sigmoid",
        Arc::new(
            |ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]| -> anyhow::Result<Option<SymbolicOutputs>> {
                let x = inputs[0].expect("present");
                let y = ctx.op1("HardSigmoid", &[x], |n| {
                    n.set_f("alpha", 0.2);
                })?;
                Ok(Some(vec![Some(y)]))
            },
        ),
    );
    let (lowered, _) = to_onnx(&sample_graph(), &registry).expect("lower");
    assert_eq!(
        kinds_of(&lowered),
        vec!["onnx::Mul", "onnx::Add", "onnx::HardSigmoid"]
    );
}

#[test]
fn hooks_with_the_wrong_arity_fail() {
    let registry = SymbolicRegistry::new();
    registry.register(
        "aten::sigmoid",
        Arc::new(
            |_: &mut SymbolicContext<'_>, _: &[Option<ValueId>]| -> anyhow::Result<Option<SymbolicOutputs>> {
                Ok(Some(Vec::new()))
            },
        ),
    );
    let err = to_onnx(&sample_graph(), &registry).expect_err("wrong arity");
    assert!(
        err.to_string().contains("incorrect number of outputs"),
        "{err:#}"
    );
}

#[test]
fn unknown_kinds_are_cloned() {
    let mut graph = Graph::new();
    let x = graph.add_input();
    let node = graph
        .create_node(Symbol::aten("mystery"), &[x], 1)
        .expect("create");
    graph.append_node(node);
    graph.node_mut(node).set_i("level", 3);
    graph
        .register_output(graph.node(node).output(0))
        .expect("register output");

    let (lowered, _) = to_onnx(&graph, &SymbolicRegistry::empty()).expect("lower");
    let clone = lowered.node_ids()[0];
    assert_eq!(lowered.node(clone).kind(), &Symbol::aten("mystery"));
    assert_eq!(lowered.node(clone).i("level"), 3);
    assert_eq!(lowered.node(clone).inputs(), lowered.inputs());
}

#[derive(Debug)]
struct Relu;

impl HostOp for Relu {
    fn name(&self) -> &str {
        "Relu"
    }

    fn symbolic(
        &self,
        ctx: &mut SymbolicContext<'_>,
        inputs: &[Option<ValueId>],
    ) -> Option<anyhow::Result<Vec<Option<ValueId>>>> {
        let x = inputs[0]?;
        Some(ctx.op1("Relu", &[x], |_| {}).map(|y| vec![Some(y)]))
    }
}

#[test]
fn host_op_symbolic_is_tried_first() {
    let mut graph = Graph::new();
    let x = graph.add_input();
    let node = graph
        .create_host_op(Arc::new(Relu), &[x], 1)
        .expect("create");
    graph.append_node(node);
    graph
        .register_output(graph.node(node).output(0))
        .expect("register output");
    assert_eq!(graph.node(node).kind(), &kinds::HOST_OP);

    let (lowered, _) = to_onnx(&graph, global_registry()).expect("lower");
    assert_eq!(kinds_of(&lowered), vec!["onnx::Relu"]);
}

#[test]
fn lowering_a_trace_remaps_buffers() {
    let weight = Tensor::from_slice(&[1], &[2.0f32]).expect("weight");
    let x = Variable::new(Tensor::from_slice(&[1], &[3.0f32]).expect("x"), false);
    let (state, inputs) = tracer::enter(
        vec![TraceInput::Variable(x), TraceInput::Buffer(weight.clone())],
        1,
    )
    .expect("enter");
    let w = Variable::new(weight.clone(), false);
    let outputs = tracer::record_op(
        Symbol::aten("mul"),
        &[inputs[0].clone(), w],
        |_| {},
        |_| Ok(vec![Variable::new(Tensor::from_slice(&[1], &[6.0f32])?, false)]),
    )
    .expect("mul");
    tracer::exit(&outputs).expect("exit");

    state.lower_to_onnx(global_registry()).expect("lower");
    let buffer = state.buffer_value(weight.storage_key()).expect("buffer");
    state.with_graph(|graph| {
        assert_eq!(kinds_of(graph), vec!["onnx::Mul"]);
        assert_eq!(graph.inputs()[1], buffer);
        assert_eq!(graph.node(graph.node_ids()[0]).input(1), buffer);
    });
}

fn lower_script(source: &str) -> anyhow::Result<Graph> {
    let module = Arc::new(Module::new());
    define_module_methods(&module, source, &builtin_resolver()).expect("define");
    let method = module.method("forward").expect("method");
    to_onnx(method.graph(), global_registry()).map(|(lowered, _)| lowered)
}

#[test]
fn missing_or_mistyped_script_attributes_are_errors() {
    let err = lower_script("def forward(self, x, y):\n  return cat(x, y)\n")
        .expect_err("cat without dim");
    assert!(
        format!("{err:#}").contains("aten::cat requires the 'dim' attribute"),
        "{err:#}"
    );

    let err = lower_script("def forward(self, x, y):\n  return cat(x, y, dim=1.0)\n")
        .expect_err("floating dim");
    assert!(
        format!("{err:#}").contains("expects 'dim' of kind i but found f"),
        "{err:#}"
    );

    let err = lower_script("def forward(self, x):\n  return view(x)\n").expect_err("view without size");
    assert!(
        format!("{err:#}").contains("aten::view requires the 'size' attribute"),
        "{err:#}"
    );

    let lowered = lower_script("def forward(self, x, y):\n  return cat(x, y, dim=1)\n")
        .expect("cat with dim");
    assert_eq!(kinds_of(&lowered), vec!["onnx::Concat"]);
}
