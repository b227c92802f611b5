use super::attributes::Attributes;
use super::source::SourceRange;
use super::symbol::Symbol;
use super::types::Type;
use crate::passes::onnx::SymbolicContext;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Process-unique identifier of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(pub u32);

/// Handle to a node owned by a [`Graph`](super::Graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(super) graph: GraphId,
    pub(super) index: u32,
}

/// Handle to a value owned by a [`Graph`](super::Graph).
///
/// The pair of graph id and arena slot is unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId {
    pub(super) graph: GraphId,
    pub(super) index: u32,
}

impl NodeId {
    pub fn graph(self) -> GraphId {
        self.graph
    }
}

impl ValueId {
    pub fn graph(self) -> GraphId {
        self.graph
    }
}

/// One entry of a value's use-list: `user.inputs()[offset]` is the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    pub user: NodeId,
    pub offset: usize,
}

/// Operation implemented by the embedding host (a closure or a foreign
/// function) and recorded opaquely as a `prim::HostOp` or `prim::NativeOp`.
pub trait HostOp: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Native ops are opaque closures with no symbolic form at all.
    fn is_native(&self) -> bool {
        false
    }

    /// Method-level export hook. `None` means the op has no symbolic form and
    /// the lowering pass should try the function registry, then clone.
    fn symbolic(
        &self,
        _ctx: &mut SymbolicContext<'_>,
        _inputs: &[Option<ValueId>],
    ) -> Option<anyhow::Result<Vec<Option<ValueId>>>> {
        None
    }
}

/// A single operation in a graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub(super) kind: Symbol,
    pub(super) inputs: Vec<ValueId>,
    pub(super) outputs: Vec<ValueId>,
    pub(super) prev: Option<NodeId>,
    pub(super) next: Option<NodeId>,
    pub(super) stage: usize,
    pub(super) attributes: Attributes,
    pub(super) source: Option<Arc<SourceRange>>,
    pub(super) host_op: Option<Arc<dyn HostOp>>,
}

impl Node {
    pub(super) fn new(kind: Symbol, stage: usize) -> Self {
        Node {
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            prev: None,
            next: None,
            stage,
            attributes: Attributes::default(),
            source: None,
            host_op: None,
        }
    }

    pub fn kind(&self) -> &Symbol {
        &self.kind
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    pub fn input(&self, offset: usize) -> ValueId {
        self.inputs[offset]
    }

    pub fn output(&self, offset: usize) -> ValueId {
        self.outputs[offset]
    }

    /// Sole output of a single-output node.
    pub fn single_output(&self) -> ValueId {
        assert_eq!(
            self.outputs.len(),
            1,
            "{} has {} outputs, expected exactly one",
            self.kind,
            self.outputs.len()
        );
        self.outputs[0]
    }

    pub fn stage(&self) -> usize {
        self.stage
    }

    pub fn set_stage(&mut self, stage: usize) -> &mut Self {
        self.stage = stage;
        self
    }

    pub fn source_location(&self) -> Option<&Arc<SourceRange>> {
        self.source.as_ref()
    }

    pub fn set_source_location(&mut self, source: Option<Arc<SourceRange>>) -> &mut Self {
        self.source = source;
        self
    }

    pub fn host_op(&self) -> Option<&Arc<dyn HostOp>> {
        self.host_op.as_ref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Whether the node is linked into its graph's node list.
    pub fn is_inserted(&self) -> bool {
        self.next.is_some()
    }

    pub fn f(&self, name: &str) -> f64 {
        self.attributes.f(name)
    }

    pub fn i(&self, name: &str) -> i64 {
        self.attributes.i(name)
    }

    pub fn s(&self, name: &str) -> &str {
        self.attributes.s(name)
    }

    pub fn is(&self, name: &str) -> &[i64] {
        self.attributes.is(name)
    }

    pub fn set_f(&mut self, name: &str, value: f64) -> &mut Self {
        self.attributes.set_f(name, value);
        self
    }

    pub fn set_i(&mut self, name: &str, value: i64) -> &mut Self {
        self.attributes.set_i(name, value);
        self
    }

    pub fn set_is(&mut self, name: &str, value: Vec<i64>) -> &mut Self {
        self.attributes.set_is(name, value);
        self
    }

    pub fn set_s(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.attributes.set_s(name, value.into());
        self
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.has(name)
    }
}

/// A single SSA definition.
#[derive(Debug, Clone)]
pub struct Value {
    pub(super) node: NodeId,
    pub(super) offset: usize,
    pub(super) unique: u64,
    pub(super) name: Option<String>,
    pub(super) ty: Type,
    pub(super) stage: usize,
    pub(super) uses: SmallVec<[Use; 4]>,
}

impl Value {
    /// Producing node; graph inputs are produced by the `prim::Param` sentinel.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Position among the producer's outputs.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Graph-local sequence number, used when the value has no name.
    pub fn unique(&self) -> u64 {
        self.unique
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn unique_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.unique.to_string(),
        }
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn set_type(&mut self, ty: Type) -> &mut Self {
        self.ty = ty;
        self
    }

    pub fn stage(&self) -> usize {
        self.stage
    }

    pub fn set_stage(&mut self, stage: usize) -> &mut Self {
        self.stage = stage;
        self
    }

    pub fn uses(&self) -> &[Use] {
        &self.uses
    }

    pub fn has_uses(&self) -> bool {
        !self.uses.is_empty()
    }
}
