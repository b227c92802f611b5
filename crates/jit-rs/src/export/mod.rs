//! Validation and serialization of graphs to the ONNX wire format.
//!
//! `export` validates first and never lowers anything on its own: a graph
//! with `aten::` operators must go through [`to_onnx`](crate::passes::to_onnx)
//! (or custom rewrites) before it is exportable.
//!
//! Initializers are matched to graph inputs purely by position: the `n`
//! initializers name the last `n` graph inputs, in order. Callers must append
//! parameter inputs in the same order as the initializer list.

pub mod proto;

use crate::env;
use crate::ir::{kinds, AttributeValue, Graph, LintError, NodeId, SourceRange, Symbol, Type, ValueId};
use crate::tensor::{ScalarType, Tensor};
use proto::{
    tensor_shape_proto, type_proto, AttributeProto, AttributeType, DataType, GraphProto,
    ModelProto, NodeProto, OperatorSetIdProto, TensorProto, TensorShapeProto, TypeProto,
    ValueInfoProto,
};
use prost::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// ONNX IR version written into every model.
pub const IR_VERSION: i64 = 3;

const GRAPH_NAME: &str = "jit-rs-export";

/// Optional location of the offending node, rendered after the message.
#[derive(Debug, Clone, Default)]
pub struct Location(pub Option<Arc<SourceRange>>);

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(range) => write!(f, "\n\nOperator defined {range}"),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Couldn't export operator {kind}{location}\n\nGraph we tried to export:\n{graph}")]
    UnexportableOperator {
        kind: Symbol,
        location: Location,
        graph: String,
    },
    #[error("Couldn't export host operator {name}{location}\n\nGraph we tried to export:\n{graph}")]
    HostOperator {
        name: String,
        location: Location,
        graph: String,
    },
    #[error("Couldn't export an operator with an empty name{location}\n\nGraph we tried to export:\n{graph}")]
    EmptyOperatorName { location: Location, graph: String },
    #[error(
        "Could not export a broadcasting expand; the target format cannot represent this \
         form of broadcasting{location}\n\nGraph we tried to export:\n{graph}"
    )]
    BroadcastExpand { location: Location, graph: String },
    #[error("{initializers} initializers were given for a graph with only {inputs} inputs")]
    InitializerMismatch { initializers: usize, inputs: usize },
    #[error("graph failed lint before export: {0}")]
    Lint(#[from] LintError),
    #[error("invalid export options: {0}")]
    Options(#[from] serde_json::Error),
}

/// Knobs of [`export`]. Loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub opset_version: i64,
    pub producer_name: String,
    pub producer_version: String,
    /// Keep fully qualified kinds as op types and skip the operator-namespace
    /// check. Host ops, empty names and expand are still refused.
    pub export_raw_ir: bool,
    /// Lint the graph before encoding.
    pub lint: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            opset_version: 9,
            producer_name: "jit-rs".to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            export_raw_ir: false,
            lint: env::lint_on_export(),
        }
    }
}

impl ExportOptions {
    pub fn with_opset(opset_version: i64) -> Self {
        ExportOptions {
            opset_version,
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ExportError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Rejects nodes the target format cannot represent, including inside subgraphs.
pub fn validate(graph: &Graph, options: &ExportOptions) -> Result<(), ExportError> {
    validate_nodes(graph, graph, options)
}

fn validate_nodes(root: &Graph, graph: &Graph, options: &ExportOptions) -> Result<(), ExportError> {
    for node in graph.nodes() {
        let n = graph.node(node);
        let location = || Location(n.source_location().cloned());
        let kind = n.kind();
        if kind.name().is_empty() {
            return Err(ExportError::EmptyOperatorName {
                location: location(),
                graph: root.to_string(),
            });
        }
        if *kind == kinds::HOST_OP || *kind == kinds::NATIVE_OP {
            let name = n
                .host_op()
                .map(|op| op.name().to_string())
                .unwrap_or_else(|| kind.to_string());
            return Err(ExportError::HostOperator {
                name,
                location: location(),
                graph: root.to_string(),
            });
        }
        if *kind == kinds::EXPAND {
            return Err(ExportError::BroadcastExpand {
                location: location(),
                graph: root.to_string(),
            });
        }
        if !options.export_raw_ir && !kind.is_onnx() && *kind != kinds::UNDEFINED {
            return Err(ExportError::UnexportableOperator {
                kind: kind.clone(),
                location: location(),
                graph: root.to_string(),
            });
        }
        for (_, value) in n.attributes().iter() {
            match value {
                AttributeValue::G(sub) => validate_nodes(root, sub, options)?,
                AttributeValue::Gs(subs) => {
                    for sub in subs {
                        validate_nodes(root, sub, options)?;
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Element kind code of the wire format.
///
/// Byte and Char share the signed 8-bit code.
pub fn scalar_type_to_onnx(scalar_type: ScalarType) -> DataType {
    match scalar_type {
        ScalarType::Double => DataType::Double,
        ScalarType::Float => DataType::Float,
        ScalarType::Half => DataType::Float16,
        ScalarType::Byte | ScalarType::Char => DataType::Int8,
        ScalarType::Short => DataType::Int16,
        ScalarType::Int => DataType::Int32,
        ScalarType::Long => DataType::Int64,
    }
}

/// Validates `graph` and builds the model message.
pub fn export_model(
    graph: &Graph,
    initializers: &[Tensor],
    options: &ExportOptions,
) -> Result<ModelProto, ExportError> {
    validate(graph, options)?;
    if options.lint {
        graph.lint()?;
    }
    let inputs = graph.inputs().len();
    if initializers.len() > inputs {
        return Err(ExportError::InitializerMismatch {
            initializers: initializers.len(),
            inputs,
        });
    }
    let encoder = Encoder { options };
    let mut graph_proto = encoder.graph(graph, GRAPH_NAME);
    let first_param = inputs - initializers.len();
    for (input, tensor) in graph.inputs()[first_param..].iter().zip(initializers) {
        let mut encoded = encode_tensor(tensor);
        encoded.name = graph.value_name(*input);
        graph_proto.initializer.push(encoded);
    }

    Ok(ModelProto {
        ir_version: IR_VERSION,
        producer_name: options.producer_name.clone(),
        producer_version: options.producer_version.clone(),
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: options.opset_version,
        }],
        graph: Some(graph_proto),
        ..ModelProto::default()
    })
}

/// Validates `graph` and returns the encoded model bytes.
pub fn export(
    graph: &Graph,
    initializers: &[Tensor],
    options: &ExportOptions,
) -> Result<Vec<u8>, ExportError> {
    let model = export_model(graph, initializers, options)?;
    let bytes = model.encode_to_vec();
    tracing::debug!(
        nodes = model.graph.as_ref().map_or(0, |g| g.node.len()),
        initializers = initializers.len(),
        bytes = bytes.len(),
        "exported graph"
    );
    Ok(bytes)
}

struct Encoder<'a> {
    options: &'a ExportOptions,
}

impl Encoder<'_> {
    fn graph(&self, graph: &Graph, name: &str) -> GraphProto {
        let mut proto = GraphProto {
            name: name.to_string(),
            ..GraphProto::default()
        };
        proto.input = graph
            .inputs()
            .iter()
            .map(|&v| value_info(graph, v))
            .collect();
        for node in graph.nodes() {
            if *graph.node(node).kind() == kinds::UNDEFINED {
                continue;
            }
            proto.node.push(self.node(graph, node));
        }
        proto.output = graph
            .outputs()
            .iter()
            .map(|&v| value_info(graph, v))
            .collect();
        proto
    }

    fn node(&self, graph: &Graph, node: NodeId) -> NodeProto {
        let n = graph.node(node);
        let op_type = if self.options.export_raw_ir {
            n.kind().as_str().to_string()
        } else {
            n.kind().name().to_string()
        };
        let input = n
            .inputs()
            .iter()
            .map(|&v| match graph.producer(v) {
                Some(p) if *graph.node(p).kind() == kinds::UNDEFINED => String::new(),
                _ => graph.value_name(v),
            })
            .collect();
        let output = n.outputs().iter().map(|&v| graph.value_name(v)).collect();
        let attribute = n
            .attributes()
            .iter()
            .map(|(name, value)| self.attribute(name, value))
            .collect();
        let doc_string = n
            .source_location()
            .map(|range| range.to_string())
            .unwrap_or_default();
        NodeProto {
            input,
            output,
            op_type,
            attribute,
            doc_string,
            ..NodeProto::default()
        }
    }

    fn attribute(&self, name: &str, value: &AttributeValue) -> AttributeProto {
        let mut proto = AttributeProto {
            name: name.to_string(),
            ..AttributeProto::default()
        };
        let kind = match value {
            AttributeValue::F(v) => {
                proto.f = *v as f32;
                AttributeType::Float
            }
            AttributeValue::Fs(vs) => {
                proto.floats = vs.iter().map(|&v| v as f32).collect();
                AttributeType::Floats
            }
            AttributeValue::I(v) => {
                proto.i = *v;
                AttributeType::Int
            }
            AttributeValue::Is(vs) => {
                proto.ints = vs.clone();
                AttributeType::Ints
            }
            AttributeValue::S(v) => {
                proto.s = v.as_bytes().to_vec();
                AttributeType::String
            }
            AttributeValue::Ss(vs) => {
                proto.strings = vs.iter().map(|v| v.as_bytes().to_vec()).collect();
                AttributeType::Strings
            }
            AttributeValue::T(t) => {
                proto.t = Some(encode_tensor(t));
                AttributeType::Tensor
            }
            AttributeValue::Ts(ts) => {
                proto.tensors = ts.iter().map(encode_tensor).collect();
                AttributeType::Tensors
            }
            AttributeValue::G(g) => {
                proto.g = Some(self.graph(g, name));
                AttributeType::Graph
            }
            AttributeValue::Gs(gs) => {
                proto.graphs = gs.iter().map(|g| self.graph(g, name)).collect();
                AttributeType::Graphs
            }
        };
        proto.r#type = kind as i32;
        proto
    }
}

fn encode_tensor(tensor: &Tensor) -> TensorProto {
    TensorProto {
        dims: tensor.sizes().to_vec(),
        data_type: scalar_type_to_onnx(tensor.scalar_type()) as i32,
        raw_data: tensor.raw_bytes(),
        ..TensorProto::default()
    }
}

fn value_info(graph: &Graph, value: ValueId) -> ValueInfoProto {
    let r#type = match graph.value_type(value) {
        Type::Tensor(ty) => Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: scalar_type_to_onnx(ty.scalar_type()) as i32,
                shape: Some(TensorShapeProto {
                    dim: ty
                        .sizes()
                        .iter()
                        .map(|&size| tensor_shape_proto::Dimension {
                            value: Some(tensor_shape_proto::dimension::Value::DimValue(size)),
                        })
                        .collect(),
                }),
            })),
        }),
        Type::Dynamic => None,
    };
    ValueInfoProto {
        name: graph.value_name(value),
        r#type,
        ..ValueInfoProto::default()
    }
}
