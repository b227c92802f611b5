use jit_rs::export::proto::{AttributeType, DataType, ModelProto};
use jit_rs::export::IR_VERSION;
use jit_rs::ir::{Graph, HostOp, Symbol};
use jit_rs::passes::{global_registry, to_onnx};
use jit_rs::script::{builtin_resolver, define_module_methods, Module};
use jit_rs::symbolic::SymbolicVariable;
use jit_rs::tensor::{ScalarType, Tensor};
use jit_rs::{export, export_model, validate, ExportError, ExportOptions};
use prost::Message;
use std::cell::RefCell;
use std::sync::Arc;

fn options() -> ExportOptions {
    ExportOptions {
        lint: true,
        ..ExportOptions::default()
    }
}

fn single_node(kind: Symbol) -> Graph {
    let mut graph = Graph::new();
    let x = graph.add_input();
    let node = graph.create_node(kind, &[x], 1).expect("create");
    graph.append_node(node);
    graph
        .register_output(graph.node(node).output(0))
        .expect("register output");
    graph
}

#[test]
fn broadcasting_expand_is_refused() {
    let graph = RefCell::new(Graph::new());
    let x = SymbolicVariable::as_new_input(&graph);
    let y = x.expand(vec![2, 3]);
    graph
        .borrow_mut()
        .register_output(y.value())
        .expect("register output");
    let (lowered, _) = to_onnx(&graph.borrow(), global_registry()).expect("lower");

    match export(&lowered, &[], &options()) {
        Err(ExportError::BroadcastExpand { .. }) => {}
        other => panic!("expected BroadcastExpand, got {other:?}"),
    }
}

#[test]
fn unlowered_operators_are_refused() {
    let graph = single_node(Symbol::aten("sigmoid"));
    match validate(&graph, &options()) {
        Err(err @ ExportError::UnexportableOperator { .. }) => {
            let message = err.to_string();
            assert!(message.starts_with("Couldn't export operator aten::sigmoid"), "{message}");
            assert!(message.contains("Graph we tried to export:"), "{message}");
        }
        other => panic!("expected UnexportableOperator, got {other:?}"),
    }
}

#[derive(Debug)]
struct Opaque;

impl HostOp for Opaque {
    fn name(&self) -> &str {
        "opaque_kernel"
    }
}

#[test]
fn host_operators_are_refused_by_name() {
    let mut graph = Graph::new();
    let x = graph.add_input();
    let node = graph
        .create_host_op(Arc::new(Opaque), &[x], 1)
        .expect("create");
    graph.append_node(node);
    graph
        .register_output(graph.node(node).output(0))
        .expect("register output");

    let raw = ExportOptions {
        export_raw_ir: true,
        ..options()
    };
    match validate(&graph, &raw) {
        Err(ExportError::HostOperator { name, .. }) => assert_eq!(name, "opaque_kernel"),
        other => panic!("expected HostOperator, got {other:?}"),
    }
}

#[test]
fn encoded_model_decodes_with_attributes_and_opset() {
    let mut graph = single_node(Symbol::onnx("Mul"));
    let scale = Tensor::from_slice(&[2], &[1.5f32, -2.0]).expect("scale");
    let node = graph.node_ids()[0];
    graph
        .node_mut(node)
        .set_f("alpha", 0.25)
        .set_is("axes", vec![0, 1])
        .attributes_mut()
        .set_t("scale", scale.clone());

    let bytes = export(&graph, &[], &ExportOptions::with_opset(7)).expect("export");
    let model = ModelProto::decode(&bytes[..]).expect("decode");
    assert_eq!(model.ir_version, IR_VERSION);
    assert_eq!(model.producer_name, "jit-rs");
    assert_eq!(model.opset_import.len(), 1);
    assert_eq!(model.opset_import[0].version, 7);

    let encoded = model.graph.expect("graph");
    assert_eq!(encoded.node.len(), 1);
    let mul = &encoded.node[0];
    assert_eq!(mul.op_type, "Mul");
    assert_eq!(mul.input, vec![encoded.input[0].name.clone()]);
    assert_eq!(mul.output, vec![encoded.output[0].name.clone()]);

    let attribute = |name: &str| {
        mul.attribute
            .iter()
            .find(|a| a.name == name)
            .unwrap_or_else(|| panic!("missing attribute {name}"))
    };
    assert_eq!(attribute("alpha").f, 0.25);
    assert_eq!(attribute("alpha").r#type, AttributeType::Float as i32);
    assert_eq!(attribute("axes").ints, vec![0, 1]);
    let tensor = attribute("scale").t.as_ref().expect("tensor attribute");
    assert_eq!(tensor.dims, vec![2]);
    assert_eq!(tensor.data_type, DataType::Float as i32);
    assert_eq!(tensor.raw_data, scale.raw_bytes());
}

fn linear_module() -> Arc<Module> {
    let module = Arc::new(Module::new());
    module.register_parameter(
        "weight",
        Tensor::from_slice(&[2, 2], &[1.0f32, 2.0, 3.0, 4.0]).expect("weight"),
    );
    let inner = Arc::new(Module::new());
    inner.register_parameter(
        "bias",
        Tensor::from_slice(&[2], &[0.5f32, -0.5]).expect("bias"),
    );
    module.register_module("inner", inner);
    define_module_methods(
        &module,
        "def forward(self, x):\n  return self.weight @ x + self.inner.bias\n",
        &builtin_resolver(),
    )
    .expect("define");
    module
}

#[test]
fn initializers_name_the_trailing_inputs() {
    let module = linear_module();
    let method = module.method("forward").expect("method");
    let (lowered, _) = to_onnx(method.graph(), global_registry()).expect("lower");
    let model = export_model(&lowered, &method.initializers(), &options()).expect("export");

    let graph = model.graph.expect("graph");
    let inputs: Vec<&str> = graph.input.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(inputs, vec!["x", "weight", "inner.bias"]);
    let initializers: Vec<&str> = graph.initializer.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(initializers, vec!["weight", "inner.bias"]);
    assert_eq!(graph.initializer[1].data_type, DataType::Float as i32);
    let ops: Vec<&str> = graph.node.iter().map(|n| n.op_type.as_str()).collect();
    assert_eq!(ops, vec!["MatMul", "Add"]);
}

#[test]
fn more_initializers_than_inputs_is_an_error() {
    let graph = single_node(Symbol::onnx("Relu"));
    let extra = Tensor::scalar(1.0, ScalarType::Float);
    match export(&graph, &[extra.clone(), extra], &options()) {
        Err(ExportError::InitializerMismatch { initializers, inputs }) => {
            assert_eq!((initializers, inputs), (2, 1));
        }
        other => panic!("expected InitializerMismatch, got {other:?}"),
    }
}

#[test]
fn raw_mode_keeps_qualified_kinds() {
    let graph = single_node(Symbol::aten("sigmoid"));
    let raw = ExportOptions {
        export_raw_ir: true,
        ..options()
    };
    let model = export_model(&graph, &[], &raw).expect("export");
    let graph = model.graph.expect("graph");
    assert_eq!(graph.node[0].op_type, "aten::sigmoid");
}

#[test]
fn options_load_from_json_with_defaults() {
    let parsed = ExportOptions::from_json(r#"{"opset_version": 11, "export_raw_ir": true}"#)
        .expect("options");
    assert_eq!(parsed.opset_version, 11);
    assert!(parsed.export_raw_ir);
    assert_eq!(parsed.producer_name, "jit-rs");

    match ExportOptions::from_json(r#"{"opset_version": "nine"}"#) {
        Err(ExportError::Options(_)) => {}
        other => panic!("expected Options error, got {other:?}"),
    }
}
