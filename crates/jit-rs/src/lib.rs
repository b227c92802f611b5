//! Graph IR with use-lists, an operation tracer, a small script front end
//! and an ONNX exporter.
//!
//! Downstream crates can add lowerings for their own operators by
//! registering into [`passes::onnx::SYMBOLIC_DEFS`] with
//! `#[jit_rs::linkme::distributed_slice]`.

pub use linkme;

mod env;
pub mod export;
pub mod ir;
pub mod passes;
pub mod script;
pub mod symbolic;
pub mod tensor;
pub mod tracer;

pub use export::{export, export_model, validate, ExportError, ExportOptions};
pub use ir::{Graph, IrError, NodeId, SourceRange, Symbol, ValueId};
pub use tensor::{ScalarType, Tensor};
