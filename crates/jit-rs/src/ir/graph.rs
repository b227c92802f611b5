//! Arena-backed graph with per-value use-lists.
//!
//! ```text
//!   prim::Param ──outputs──► graph inputs
//!        │
//!   ┌────▼─────────────────────────────────────────────┐
//!   │ prim::Return ⇄ n0 ⇄ n1 ⇄ ... ⇄ nk ⇄ prim::Return  │  circular node list
//!   └──────────────────────────────────────────────────┘
//!   graph outputs = inputs of prim::Return
//! ```
//!
//! Nodes and values live in slot arenas addressed by [`NodeId`] / [`ValueId`].
//! Every value keeps the exact inverse of the node input arrays in its use-list,
//! and every method that edits an input array edits the use-lists in the same
//! call. Graph inputs are outputs of the `prim::Param` sentinel, which is never
//! part of the node list; graph outputs are inputs of the `prim::Return`
//! sentinel, which also terminates the circular list.

use super::node::{GraphId, HostOp, Node, NodeId, Use, Value, ValueId};
use super::symbol::{kinds, Symbol};
use super::types::{TensorType, Type};
use crate::tensor::Tensor;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

static GRAPH_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Structural errors raised by graph mutation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("value belongs to graph {found:?} but was used in graph {expected:?}")]
    ForeignValue { expected: GraphId, found: GraphId },
    #[error("value %{value} was destroyed")]
    DeadValue { value: u32 },
    #[error("value %{value} produced by {kind} is still in use ({uses} uses)")]
    ValueInUse {
        value: String,
        kind: Symbol,
        uses: usize,
    },
    #[error("cannot destroy sentinel node {kind}")]
    SentinelNode { kind: Symbol },
    #[error("value names may not be integers: '{name}'")]
    InvalidName { name: String },
}

#[derive(Debug)]
pub struct Graph {
    pub(super) id: GraphId,
    pub(super) nodes: Vec<Option<Node>>,
    pub(super) values: Vec<Option<Value>>,
    pub(super) param_node: NodeId,
    pub(super) return_node: NodeId,
    insert_point: NodeId,
    next_unique: u64,
    stage: usize,
    new_node_stage: usize,
    names: HashMap<String, ValueId>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        let id = GraphId(GRAPH_ID_COUNTER.fetch_add(1, Ordering::Relaxed));
        let param_node = NodeId { graph: id, index: 0 };
        let return_node = NodeId { graph: id, index: 1 };
        let mut ret = Node::new(kinds::RETURN, 0);
        ret.prev = Some(return_node);
        ret.next = Some(return_node);
        Graph {
            id,
            nodes: vec![Some(Node::new(kinds::PARAM, 0)), Some(ret)],
            values: Vec::new(),
            param_node,
            return_node,
            insert_point: return_node,
            next_unique: 0,
            stage: 0,
            new_node_stage: 0,
            names: HashMap::new(),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn param_node(&self) -> NodeId {
        self.param_node
    }

    pub fn return_node(&self) -> NodeId {
        self.return_node
    }

    pub fn inputs(&self) -> &[ValueId] {
        self.node(self.param_node).outputs()
    }

    pub fn outputs(&self) -> &[ValueId] {
        self.node(self.return_node).inputs()
    }

    // ---- arena access -------------------------------------------------

    pub fn node(&self, id: NodeId) -> &Node {
        match self.try_node(id) {
            Some(node) => node,
            None => panic!("{id:?} does not refer to a live node of graph {:?}", self.id),
        }
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        let graph = self.id;
        match self.try_node_mut(id) {
            Some(node) => node,
            None => panic!("{id:?} does not refer to a live node of graph {graph:?}"),
        }
    }

    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        if id.graph != self.id {
            return None;
        }
        self.nodes.get(id.index as usize).and_then(Option::as_ref)
    }

    fn try_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if id.graph != self.id {
            return None;
        }
        self.nodes.get_mut(id.index as usize).and_then(Option::as_mut)
    }

    pub fn value(&self, id: ValueId) -> &Value {
        match self.try_value(id) {
            Some(value) => value,
            None => panic!("{id:?} does not refer to a live value of graph {:?}", self.id),
        }
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        let graph = self.id;
        match self.try_value_mut(id) {
            Some(value) => value,
            None => panic!("{id:?} does not refer to a live value of graph {graph:?}"),
        }
    }

    pub fn try_value(&self, id: ValueId) -> Option<&Value> {
        if id.graph != self.id {
            return None;
        }
        self.values.get(id.index as usize).and_then(Option::as_ref)
    }

    fn try_value_mut(&mut self, id: ValueId) -> Option<&mut Value> {
        if id.graph != self.id {
            return None;
        }
        self.values.get_mut(id.index as usize).and_then(Option::as_mut)
    }

    fn check_value(&self, id: ValueId) -> Result<(), IrError> {
        if id.graph != self.id {
            return Err(IrError::ForeignValue {
                expected: self.id,
                found: id.graph,
            });
        }
        if self.try_value(id).is_none() {
            return Err(IrError::DeadValue { value: id.index });
        }
        Ok(())
    }

    /// Producer of `value`, or `None` for graph inputs.
    pub fn producer(&self, value: ValueId) -> Option<NodeId> {
        let node = self.value(value).node();
        (node != self.param_node).then_some(node)
    }

    pub fn uses(&self, value: ValueId) -> &[Use] {
        self.value(value).uses()
    }

    /// Display name without the `%` sigil.
    pub fn value_name(&self, value: ValueId) -> String {
        self.value(value).unique_name()
    }

    pub fn value_type(&self, value: ValueId) -> &Type {
        self.value(value).ty()
    }

    pub fn set_value_type(&mut self, value: ValueId, ty: impl Into<Type>) {
        self.value_mut(value).set_type(ty.into());
    }

    /// Assigns a unique debug name. A previous holder of `name` is renamed to
    /// `name.N` with the first free suffix.
    pub fn set_value_name(&mut self, value: ValueId, name: &str) -> Result<(), IrError> {
        self.check_value(value)?;
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
            return Err(IrError::InvalidName {
                name: name.to_string(),
            });
        }
        if let Some(old) = self.value_mut(value).name.take() {
            self.names.remove(&old);
        }
        if name.is_empty() {
            return Ok(());
        }
        if let Some(&holder) = self.names.get(name) {
            let mut suffix = 1;
            let renamed = loop {
                let candidate = format!("{name}.{suffix}");
                if !self.names.contains_key(&candidate) {
                    break candidate;
                }
                suffix += 1;
            };
            self.value_mut(holder).name = Some(renamed.clone());
            self.names.insert(renamed, holder);
        }
        self.names.insert(name.to_string(), value);
        self.value_mut(value).name = Some(name.to_string());
        Ok(())
    }

    pub fn find_value_by_name(&self, name: &str) -> Option<ValueId> {
        self.names.get(name).copied()
    }

    fn alloc_value(&mut self, node: NodeId, offset: usize) -> ValueId {
        let id = ValueId {
            graph: self.id,
            index: self.values.len() as u32,
        };
        let unique = self.next_unique;
        self.next_unique += 1;
        self.values.push(Some(Value {
            node,
            offset,
            unique,
            name: None,
            ty: Type::Dynamic,
            stage: self.new_node_stage,
            uses: SmallVec::new(),
        }));
        id
    }

    fn free_value(&mut self, value: ValueId) {
        if let Some(slot) = self.values.get_mut(value.index as usize) {
            if let Some(freed) = slot.take() {
                if let Some(name) = freed.name {
                    self.names.remove(&name);
                }
            }
        }
    }

    fn add_use(&mut self, value: ValueId, user: NodeId, offset: usize) {
        self.value_mut(value).uses.push(Use { user, offset });
    }

    fn drop_use(&mut self, value: ValueId, user: NodeId, offset: usize) {
        let uses = &mut self.value_mut(value).uses;
        match uses.iter().position(|u| u.user == user && u.offset == offset) {
            Some(pos) => {
                uses.remove(pos);
            }
            None => panic!("use-list of {value:?} has no entry for {user:?} input {offset}"),
        }
    }

    fn retarget_use(&mut self, value: ValueId, user: NodeId, from: usize, to: usize) {
        let uses = &mut self.value_mut(value).uses;
        match uses.iter_mut().find(|u| u.user == user && u.offset == from) {
            Some(entry) => entry.offset = to,
            None => panic!("use-list of {value:?} has no entry for {user:?} input {from}"),
        }
    }

    // ---- graph inputs and outputs ------------------------------------

    /// Appends a new graph input.
    pub fn add_input(&mut self) -> ValueId {
        let param = self.param_node;
        let offset = self.node(param).outputs.len();
        let value = self.alloc_value(param, offset);
        self.node_mut(param).outputs.push(value);
        value
    }

    /// Removes an unused graph input.
    pub fn erase_input(&mut self, offset: usize) -> Result<(), IrError> {
        let param = self.param_node;
        self.erase_node_output(param, offset)
    }

    /// Appends `value` to the graph outputs and returns its position.
    pub fn register_output(&mut self, value: ValueId) -> Result<usize, IrError> {
        let ret = self.return_node;
        self.add_node_input(ret, value)
    }

    pub fn erase_output(&mut self, offset: usize) {
        let ret = self.return_node;
        self.remove_node_input(ret, offset);
    }

    // ---- node creation -----------------------------------------------

    /// Allocates a node that is not yet part of the node list.
    ///
    /// Nothing is allocated when an input is foreign or dead.
    pub fn create_node(
        &mut self,
        kind: Symbol,
        inputs: &[ValueId],
        num_outputs: usize,
    ) -> Result<NodeId, IrError> {
        for &input in inputs {
            self.check_value(input)?;
        }
        let id = NodeId {
            graph: self.id,
            index: self.nodes.len() as u32,
        };
        self.nodes.push(Some(Node::new(kind, self.new_node_stage)));
        for (offset, &input) in inputs.iter().enumerate() {
            self.node_mut(id).inputs.push(input);
            self.add_use(input, id, offset);
        }
        for _ in 0..num_outputs {
            self.add_node_output(id);
        }
        Ok(id)
    }

    /// Allocates a `onnx::Constant` node holding `tensor` in its `value` attribute.
    pub fn create_constant(&mut self, tensor: Tensor) -> NodeId {
        let id = self.alloc_bare(kinds::CONSTANT, 1);
        let ty = TensorType::from_tensor(&tensor).contiguous();
        let output = self.node(id).output(0);
        self.value_mut(output).set_type(ty.into());
        self.node_mut(id).attributes.set_t("value", tensor);
        id
    }

    /// Allocates a `prim::Undefined` node standing for an absent value.
    pub fn create_undefined(&mut self) -> NodeId {
        self.alloc_bare(kinds::UNDEFINED, 1)
    }

    /// Allocates an opaque host operation node.
    pub fn create_host_op(
        &mut self,
        op: Arc<dyn HostOp>,
        inputs: &[ValueId],
        num_outputs: usize,
    ) -> Result<NodeId, IrError> {
        let kind = if op.is_native() {
            kinds::NATIVE_OP
        } else {
            kinds::HOST_OP
        };
        let id = self.create_node(kind, inputs, num_outputs)?;
        self.node_mut(id).host_op = Some(op);
        Ok(id)
    }

    fn alloc_bare(&mut self, kind: Symbol, num_outputs: usize) -> NodeId {
        match self.create_node(kind, &[], num_outputs) {
            Ok(id) => id,
            Err(err) => unreachable!("node without inputs cannot fail: {err}"),
        }
    }

    /// Copies `node` of `source` into this graph, mapping its inputs through
    /// `value_map`. Attributes, payload, stage, location and output metadata
    /// are copied; the clone is not inserted.
    pub fn create_clone<F, E>(
        &mut self,
        source: &Graph,
        node: NodeId,
        mut value_map: F,
    ) -> Result<NodeId, E>
    where
        F: FnMut(ValueId) -> Result<ValueId, E>,
        E: From<IrError>,
    {
        let original = source.node(node);
        let inputs = original
            .inputs()
            .iter()
            .map(|&v| value_map(v))
            .collect::<Result<Vec<_>, _>>()?;
        let id = self.create_node(original.kind().clone(), &inputs, original.outputs().len())?;
        {
            let clone = self.node_mut(id);
            clone.attributes = original.attributes.clone();
            clone.host_op = original.host_op.clone();
            clone.source = original.source.clone();
            clone.stage = original.stage;
        }
        for (offset, &out) in original.outputs().iter().enumerate() {
            let target = self.node(id).output(offset);
            self.copy_value_metadata(source, out, target)?;
        }
        Ok(id)
    }

    /// Copies type, stage and name of `from` (in `source`) onto `to`.
    pub fn copy_value_metadata(
        &mut self,
        source: &Graph,
        from: ValueId,
        to: ValueId,
    ) -> Result<(), IrError> {
        let from_value = source.value(from);
        let ty = from_value.ty().clone();
        let stage = from_value.stage();
        let name = from_value.name().map(str::to_string);
        self.value_mut(to).set_type(ty).set_stage(stage);
        if let Some(name) = name {
            self.set_value_name(to, &name)?;
        }
        Ok(())
    }

    // ---- node inputs and outputs -------------------------------------

    pub fn add_node_input(&mut self, node: NodeId, value: ValueId) -> Result<usize, IrError> {
        self.check_value(value)?;
        let offset = self.node(node).inputs.len();
        self.node_mut(node).inputs.push(value);
        self.add_use(value, node, offset);
        Ok(offset)
    }

    /// Points input `offset` of `node` at `value`, returning the previous input.
    pub fn replace_node_input(
        &mut self,
        node: NodeId,
        offset: usize,
        value: ValueId,
    ) -> Result<ValueId, IrError> {
        self.check_value(value)?;
        let old = self.node(node).input(offset);
        self.drop_use(old, node, offset);
        self.node_mut(node).inputs[offset] = value;
        self.add_use(value, node, offset);
        Ok(old)
    }

    /// Replaces every occurrence of `from` among the inputs of `node`.
    pub fn replace_input_with(
        &mut self,
        node: NodeId,
        from: ValueId,
        to: ValueId,
    ) -> Result<(), IrError> {
        self.check_value(to)?;
        let positions: Vec<usize> = self
            .node(node)
            .inputs()
            .iter()
            .enumerate()
            .filter(|(_, &v)| v == from)
            .map(|(i, _)| i)
            .collect();
        for offset in positions {
            self.replace_node_input(node, offset, to)?;
        }
        Ok(())
    }

    /// Removes input `offset`, shifting later inputs (and their uses) down.
    pub fn remove_node_input(&mut self, node: NodeId, offset: usize) {
        let value = self.node(node).input(offset);
        self.drop_use(value, node, offset);
        self.node_mut(node).inputs.remove(offset);
        let len = self.node(node).inputs.len();
        for position in offset..len {
            let shifted = self.node(node).input(position);
            self.retarget_use(shifted, node, position + 1, position);
        }
    }

    pub fn remove_all_node_inputs(&mut self, node: NodeId) {
        let inputs = std::mem::take(&mut self.node_mut(node).inputs);
        for (offset, value) in inputs.into_iter().enumerate() {
            self.drop_use(value, node, offset);
        }
    }

    pub fn add_node_output(&mut self, node: NodeId) -> ValueId {
        let offset = self.node(node).outputs.len();
        let value = self.alloc_value(node, offset);
        self.node_mut(node).outputs.push(value);
        value
    }

    /// Removes an unused output of `node`.
    pub fn erase_node_output(&mut self, node: NodeId, offset: usize) -> Result<(), IrError> {
        let value = self.node(node).output(offset);
        let uses = self.value(value).uses().len();
        if uses > 0 {
            return Err(IrError::ValueInUse {
                value: self.value_name(value),
                kind: self.node(node).kind().clone(),
                uses,
            });
        }
        self.node_mut(node).outputs.remove(offset);
        self.free_value(value);
        let len = self.node(node).outputs.len();
        for position in offset..len {
            let shifted = self.node(node).output(position);
            self.value_mut(shifted).offset = position;
        }
        Ok(())
    }

    // ---- rewriting ----------------------------------------------------

    /// Moves every use of `old` over to `new`.
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) -> Result<(), IrError> {
        self.check_value(old)?;
        self.check_value(new)?;
        if old == new {
            return Ok(());
        }
        let uses = std::mem::take(&mut self.value_mut(old).uses);
        for entry in &uses {
            self.node_mut(entry.user).inputs[entry.offset] = new;
        }
        tracing::trace!(uses = uses.len(), "replaced all uses");
        self.value_mut(new).uses.extend(uses);
        Ok(())
    }

    /// Erases `node` and its outputs. Fails while any output still has uses.
    pub fn destroy(&mut self, node: NodeId) -> Result<(), IrError> {
        if node == self.param_node || node == self.return_node {
            return Err(IrError::SentinelNode {
                kind: self.node(node).kind().clone(),
            });
        }
        for &output in self.node(node).outputs() {
            let uses = self.value(output).uses().len();
            if uses > 0 {
                return Err(IrError::ValueInUse {
                    value: self.value_name(output),
                    kind: self.node(node).kind().clone(),
                    uses,
                });
            }
        }
        self.remove_all_node_inputs(node);
        if self.node(node).is_inserted() {
            if self.insert_point == node {
                self.insert_point = self.next_in_list(node);
            }
            self.unlink(node);
        }
        let outputs = std::mem::take(&mut self.node_mut(node).outputs);
        for output in outputs {
            self.free_value(output);
        }
        self.nodes[node.index as usize] = None;
        Ok(())
    }

    // ---- node list ----------------------------------------------------

    fn next_in_list(&self, node: NodeId) -> NodeId {
        self.node(node)
            .next
            .expect("linked node must have a successor")
    }

    fn prev_in_list(&self, node: NodeId) -> NodeId {
        self.node(node)
            .prev
            .expect("linked node must have a predecessor")
    }

    fn unlink(&mut self, node: NodeId) {
        let prev = self.prev_in_list(node);
        let next = self.next_in_list(node);
        self.node_mut(prev).next = Some(next);
        self.node_mut(next).prev = Some(prev);
        let n = self.node_mut(node);
        n.prev = None;
        n.next = None;
    }

    /// Links the uninserted `node` directly before `anchor`.
    pub fn insert_before(&mut self, node: NodeId, anchor: NodeId) -> NodeId {
        assert!(
            !self.node(node).is_inserted(),
            "{} is already part of the node list",
            self.node(node).kind()
        );
        assert!(
            self.node(anchor).is_inserted(),
            "insertion anchor {} is not part of the node list",
            self.node(anchor).kind()
        );
        let prev = self.prev_in_list(anchor);
        self.node_mut(prev).next = Some(node);
        self.node_mut(anchor).prev = Some(node);
        let n = self.node_mut(node);
        n.prev = Some(prev);
        n.next = Some(anchor);
        node
    }

    /// Links the uninserted `node` directly after `anchor`.
    pub fn insert_after(&mut self, node: NodeId, anchor: NodeId) -> NodeId {
        let next = self.next_in_list(anchor);
        self.insert_before(node, next)
    }

    pub fn append_node(&mut self, node: NodeId) -> NodeId {
        let ret = self.return_node;
        self.insert_before(node, ret)
    }

    pub fn prepend_node(&mut self, node: NodeId) -> NodeId {
        let ret = self.return_node;
        self.insert_after(node, ret)
    }

    /// Links `node` at the current insertion point.
    pub fn insert_node(&mut self, node: NodeId) -> NodeId {
        let point = self.insert_point;
        self.insert_before(node, point)
    }

    /// New nodes are inserted before `node` until the point is reset.
    pub fn set_insert_point(&mut self, node: NodeId) {
        assert!(
            self.node(node).is_inserted(),
            "insertion point must be part of the node list"
        );
        self.insert_point = node;
    }

    pub fn reset_insert_point(&mut self) {
        self.insert_point = self.return_node;
    }

    pub fn insert_point(&self) -> NodeId {
        self.insert_point
    }

    pub fn move_before(&mut self, node: NodeId, anchor: NodeId) {
        self.unlink(node);
        self.insert_before(node, anchor);
    }

    pub fn move_after(&mut self, node: NodeId, anchor: NodeId) {
        self.unlink(node);
        self.insert_after(node, anchor);
    }

    /// Node following `node` in the list, `None` at the end.
    pub fn next_node(&self, node: NodeId) -> Option<NodeId> {
        let next = self.next_in_list(node);
        (next != self.return_node).then_some(next)
    }

    /// Node preceding `node` in the list, `None` at the start.
    pub fn prev_node(&self, node: NodeId) -> Option<NodeId> {
        let prev = self.prev_in_list(node);
        (prev != self.return_node).then_some(prev)
    }

    pub fn is_before(&self, node: NodeId, other: NodeId) -> bool {
        let mut cursor = node;
        while let Some(next) = self.next_node(cursor) {
            if next == other {
                return true;
            }
            cursor = next;
        }
        other == self.return_node && node != other
    }

    pub fn is_after(&self, node: NodeId, other: NodeId) -> bool {
        self.is_before(other, node)
    }

    /// Iterates the inserted nodes in order, excluding the sentinels.
    pub fn nodes(&self) -> Nodes<'_> {
        Nodes {
            graph: self,
            cursor: self.return_node,
        }
    }

    /// Snapshot of the node order, for loops that mutate the graph.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    // ---- stages -------------------------------------------------------

    pub fn stage(&self) -> usize {
        self.stage
    }

    /// Starts a new stage; nodes created afterwards belong to it.
    pub fn advance_stage(&mut self) -> usize {
        self.stage += 1;
        self.new_node_stage = self.stage;
        self.stage
    }

    pub fn set_stage(&mut self, stage: usize) {
        self.stage = stage;
        self.new_node_stage = stage;
    }

    pub fn new_node_stage(&self) -> usize {
        self.new_node_stage
    }

    pub fn set_new_node_stage(&mut self, stage: usize) {
        self.new_node_stage = stage;
    }

    /// Runs `f` with nodes created at `stage`, then restores the previous stage.
    pub fn with_stage<R>(&mut self, stage: usize, f: impl FnOnce(&mut Graph) -> R) -> R {
        let saved = self.new_node_stage;
        self.new_node_stage = stage;
        let result = f(self);
        self.new_node_stage = saved;
        result
    }
}

pub struct Nodes<'g> {
    graph: &'g Graph,
    cursor: NodeId,
}

impl Iterator for Nodes<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let next = self.graph.next_in_list(self.cursor);
        if next == self.graph.return_node {
            return None;
        }
        self.cursor = next;
        Some(next)
    }
}
