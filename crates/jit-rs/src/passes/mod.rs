//! Graph-to-graph transformations.

pub mod dce;
pub mod onnx;
mod symbolics;

use crate::ir::Graph;

pub use dce::DeadCodeEliminationPass;
pub use onnx::{global_registry, to_onnx, SymbolicContext, SymbolicFn, SymbolicRegistry};

/// Outcome of running a [`GraphPass`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassResult {
    pub changed: bool,
    pub erased_nodes: usize,
}

/// In-place rewrite of a graph.
pub trait GraphPass {
    fn name(&self) -> &'static str;

    fn run(&self, graph: &mut Graph) -> anyhow::Result<PassResult>;
}
