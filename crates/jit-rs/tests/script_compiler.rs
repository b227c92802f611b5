use jit_rs::ir::{kinds, Graph, NodeId, Symbol};
use jit_rs::script::{
    builtin_resolver, compile_function, define_methods_from_source, define_module_methods,
    parse_program, CompileError, Module,
};
use jit_rs::tensor::Tensor;
use std::sync::Arc;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn compile(source: &str) -> Graph {
    let defs = parse_program(source).expect("parse");
    compile_function(&defs[0], &builtin_resolver()).expect("compile")
}

fn compile_err(source: &str) -> CompileError {
    let defs = parse_program(source).expect("parse");
    match compile_function(&defs[0], &builtin_resolver()) {
        Ok(graph) => panic!("expected a compile error, got\n{graph}"),
        Err(err) => err,
    }
}

fn kinds_of(graph: &Graph) -> Vec<String> {
    graph
        .nodes()
        .map(|n| graph.node(n).kind().as_str().to_string())
        .collect()
}

fn only_node(graph: &Graph, kind: &Symbol) -> NodeId {
    let found: Vec<NodeId> = graph
        .nodes()
        .filter(|&n| graph.node(n).kind() == kind)
        .collect();
    assert_eq!(found.len(), 1, "expected exactly one {kind}");
    found[0]
}

#[test]
fn arithmetic_lowers_to_aten_nodes() {
    let graph = compile("def f(x, y):\n  z = x + y * 2\n  return z\n");
    graph.lint().expect("lint");
    assert_eq!(
        kinds_of(&graph),
        vec!["onnx::Constant", "aten::mul", "aten::add"]
    );
    assert_eq!(graph.inputs().len(), 2);
    assert_eq!(graph.value_name(graph.inputs()[0]), "x");
    assert_eq!(graph.value_name(graph.outputs()[0]), "z");
}

#[test]
fn operator_nodes_remember_their_source() {
    let graph = compile("def f(x):\n  return x * x\n");
    let mul = only_node(&graph, &Symbol::aten("mul"));
    let location = graph.node(mul).source_location().expect("location");
    assert_eq!(location.text(), "x * x");
}

#[test]
fn builtins_and_methods_carry_keyword_attributes() {
    let graph = compile("def f(x):\n  return sigmoid(x), x.sum(dim=1)\n");
    assert_eq!(kinds_of(&graph), vec!["aten::sigmoid", "aten::sum"]);
    let sum = only_node(&graph, &Symbol::aten("sum"));
    assert_eq!(graph.node(sum).i("dim"), 1);
    assert_eq!(graph.node(sum).inputs(), &[graph.inputs()[0]]);
    assert_eq!(graph.outputs().len(), 2);
}

#[test]
fn undefined_names_are_reported_with_their_location() {
    let err = compile_err("def f(x):\n  return foo(x)\n");
    assert_eq!(err.message(), "undefined value foo");
    assert_eq!(err.range().text(), "foo");
}

#[test]
fn if_statement_merges_names_assigned_in_both_branches() {
    let graph = compile(
        "def f(x, c):\n  if c:\n    y = x + 1\n  else:\n    y = x\n  return y\n",
    );
    graph.lint().expect("lint");
    assert_eq!(kinds_of(&graph), vec!["prim::If"]);

    let node = graph.node(only_node(&graph, &kinds::IF));
    let (x, c) = (graph.inputs()[0], graph.inputs()[1]);
    assert_eq!(node.inputs(), &[c, x]);
    assert_eq!(node.outputs().len(), 1);
    assert_eq!(graph.outputs(), node.outputs());
    assert_eq!(graph.value_name(graph.outputs()[0]), "y");

    let then_branch = node.attributes().g("then_branch");
    let else_branch = node.attributes().g("else_branch");
    assert_eq!(then_branch.inputs().len(), 1);
    assert_eq!(kinds_of(then_branch), vec!["onnx::Constant", "aten::add"]);
    assert_eq!(else_branch.outputs(), else_branch.inputs());
}

#[test]
fn one_sided_assignment_falls_back_to_the_outer_value() {
    let graph = compile("def f(x, c):\n  y = x\n  if c:\n    y = x * x\n  return y\n");
    graph.lint().expect("lint");
    let node = graph.node(only_node(&graph, &kinds::IF));
    assert_eq!(node.outputs().len(), 1);
    let else_branch = node.attributes().g("else_branch");
    assert_eq!(else_branch.node_count(), 0);
    assert_eq!(else_branch.outputs(), else_branch.inputs());
}

#[test]
fn captures_of_either_branch_become_inputs_of_both() {
    let graph = compile(
        "def f(x, z, c):\n  if c:\n    y = x\n  else:\n    y = z\n  return y\n",
    );
    graph.lint().expect("lint");
    let node = graph.node(only_node(&graph, &kinds::IF));
    let inputs = graph.inputs();
    assert_eq!(node.inputs(), &[inputs[2], inputs[0], inputs[1]]);
    assert_eq!(node.attributes().g("then_branch").inputs().len(), 2);
    assert_eq!(node.attributes().g("else_branch").inputs().len(), 2);
}

#[test]
fn while_loop_carries_reassigned_names() {
    init_logging();
    let graph = compile(
        "def f(x, n):\n  i = 0\n  while i < n:\n    x = x * 2\n    i += 1\n  return x\n",
    );
    graph.lint().expect("lint");
    assert_eq!(
        kinds_of(&graph),
        vec!["onnx::Constant", "aten::lt", "prim::While"]
    );

    let node = graph.node(only_node(&graph, &kinds::WHILE));
    // cond, x, i, then the captured n
    assert_eq!(node.inputs().len(), 4);
    assert_eq!(node.input(1), graph.inputs()[0]);
    assert_eq!(node.input(3), graph.inputs()[1]);
    assert_eq!(node.outputs().len(), 2);
    assert_eq!(graph.outputs()[0], node.output(0));

    let body = node.attributes().g("body");
    assert_eq!(body.inputs().len(), 3);
    assert_eq!(body.outputs().len(), 3);
    let next_cond = body.producer(body.outputs()[0]).expect("condition producer");
    assert_eq!(body.node(next_cond).kind(), &Symbol::aten("lt"));
}

#[test]
fn ternary_expression_lowers_to_a_conditional() {
    let graph = compile("def f(x, c):\n  return x if c else -x\n");
    graph.lint().expect("lint");
    let node = graph.node(only_node(&graph, &kinds::IF));
    assert_eq!(node.outputs().len(), 1);
    assert_eq!(
        kinds_of(node.attributes().g("else_branch")),
        vec!["aten::neg"]
    );
}

#[test]
fn return_must_be_the_last_top_level_statement() {
    let err = compile_err("def f(x):\n  return x\n  y = x\n");
    assert!(err.message().contains("last statement"), "{err}");

    let err = compile_err("def f(x, c):\n  if c:\n    return x\n  return x\n");
    assert!(err.message().contains("last statement"), "{err}");
}

#[test]
fn globals_cannot_be_assigned() {
    let err = compile_err("def f(x):\n  global w\n  w = x\n  return w\n");
    assert_eq!(err.message(), "cannot assign to global variable 'w'");
}

#[test]
fn tuple_assignment_unpacks_call_outputs() {
    let graph = compile("def f(x):\n  a, b = chunk(x, chunks=2, dim=0)\n  return b\n");
    let node = graph.node(only_node(&graph, &Symbol::aten("chunk")));
    assert_eq!(node.outputs().len(), 2);
    assert_eq!(node.i("chunks"), 2);
    assert_eq!(graph.value_name(node.output(0)), "a");
    assert_eq!(graph.outputs(), &[node.output(1)]);

    let err = compile_err("def f(x):\n  a, b = x\n  return a\n");
    assert!(err.message().contains("cannot unpack"), "{err}");
}

#[test]
fn casts_record_the_target_type() {
    let graph = compile("def f(x):\n  return float(x), x.long()\n");
    let dtypes: Vec<String> = graph
        .nodes()
        .map(|n| {
            let node = graph.node(n);
            assert_eq!(node.kind(), &Symbol::aten("_cast"));
            node.s("dtype").to_string()
        })
        .collect();
    assert_eq!(dtypes, vec!["Float", "Long"]);
}

#[test]
fn subscripts_lower_to_slice_and_index_select() {
    let graph = compile("def f(x, i):\n  return x[1:-1], x[i]\n");
    let slice = graph.node(only_node(&graph, &Symbol::aten("slice")));
    assert_eq!(
        (slice.i("dim"), slice.i("start"), slice.i("end"), slice.i("step")),
        (0, 1, -1, 1)
    );
    let gather = graph.node(only_node(&graph, &Symbol::aten("index_select")));
    assert_eq!(gather.inputs(), graph.inputs());
    assert_eq!(gather.i("dim"), 0);

    let err = compile_err("def f(x, i):\n  return x[i:]\n");
    assert_eq!(err.message(), "slice bounds must be integer constants");
}

fn demo_module() -> Arc<Module> {
    let module = Arc::new(Module::new());
    module.register_parameter(
        "weight",
        Tensor::from_slice(&[2, 2], &[1.0f32, 0.0, 0.0, 1.0]).expect("weight"),
    );
    let inner = Arc::new(Module::new());
    inner.register_parameter(
        "bias",
        Tensor::from_slice(&[2], &[0.5f32, -0.5]).expect("bias"),
    );
    module.register_module("inner", inner);
    module
}

#[test]
fn module_parameters_become_member_inputs() {
    init_logging();
    let module = demo_module();
    define_module_methods(
        &module,
        "def forward(self, x):\n  return self.weight @ x + self.inner.bias\n",
        &builtin_resolver(),
    )
    .expect("define");

    let method = module.method("forward").expect("method");
    let graph = method.graph();
    graph.lint().expect("lint");
    assert_eq!(method.num_params(), 1);
    let names: Vec<String> = graph.inputs().iter().map(|&v| graph.value_name(v)).collect();
    assert_eq!(names, vec!["x", "weight", "inner.bias"]);
    let members: Vec<&str> = method.members().iter().map(|m| m.name.as_str()).collect();
    assert_eq!(members, vec!["weight", "inner.bias"]);
    assert_eq!(
        method.initializers(),
        vec![
            module.parameter("weight").expect("weight"),
            Tensor::from_slice(&[2], &[0.5f32, -0.5]).expect("bias"),
        ]
    );
    assert_eq!(kinds_of(graph), vec!["aten::matmul", "aten::add"]);
}

#[test]
fn methods_need_a_self_parameter() {
    let module = demo_module();
    let err = define_module_methods(&module, "def g():\n  return 1\n", &builtin_resolver())
        .expect_err("missing self");
    assert!(err.message().starts_with("methods must take 'self'"), "{err}");
}

#[test]
fn failed_definition_keeps_earlier_methods() {
    let module = demo_module();
    let source = "def a(self, x):\n  return x\n\ndef b(self, x):\n  return missing(x)\n";
    let err = define_module_methods(&module, source, &builtin_resolver()).expect_err("b fails");
    assert_eq!(err.message(), "undefined value missing");
    assert!(module.method("a").is_some());
    assert!(module.method("b").is_none());
    assert_eq!(module.method_names(), vec!["a".to_string()]);

    let err = define_module_methods(&module, "def a(self):\n  return self.weight\n", &builtin_resolver())
        .expect_err("redefinition");
    assert_eq!(err.message(), "method 'a' is already defined");
}

#[test]
fn calling_sibling_methods_is_rejected() {
    let module = demo_module();
    define_module_methods(&module, "def a(self, x):\n  return x\n", &builtin_resolver())
        .expect("define a");
    let err = define_module_methods(&module, "def b(self, x):\n  return self.a(x)\n", &builtin_resolver())
        .expect_err("sibling call");
    assert!(err.message().contains("from another method"), "{err}");
}

#[test]
fn custom_resolver_and_free_functions() {
    let module = Module::new();
    let builtins = builtin_resolver();
    let resolver: jit_rs::script::Resolver = Arc::new(move |name: &str| match name {
        "squash" => builtins("tanh"),
        other => builtins(other),
    });
    define_methods_from_source(&module, "def f(x):\n  return squash(x)\n", &resolver, None)
        .expect("define");
    let method = module.method("f").expect("method");
    assert_eq!(kinds_of(method.graph()), vec!["aten::tanh"]);
    assert!(method.initializers().is_empty());
}

#[test]
fn parse_errors_surface_through_compilation() {
    let module = Module::new();
    let err = define_methods_from_source(&module, "def f(x:\n  return x\n", &builtin_resolver(), None)
        .expect_err("parse error");
    assert!(matches!(err, CompileError::Parse(_)), "{err}");
}
