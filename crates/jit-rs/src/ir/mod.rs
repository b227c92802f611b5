//! In-memory graph IR: graphs own nodes, nodes own their output values, and
//! every value tracks its consumers in a use-list.

mod attributes;
mod display;
mod graph;
mod lint;
mod node;
mod source;
mod symbol;
mod types;

pub use attributes::{AttributeKind, AttributeValue, Attributes};
pub use graph::{Graph, IrError, Nodes};
pub use lint::LintError;
pub use node::{GraphId, HostOp, Node, NodeId, Use, Value, ValueId};
pub use source::SourceRange;
pub use symbol::{kinds, Symbol, ATEN, ONNX, PRIM};
pub use types::{TensorType, Type};
