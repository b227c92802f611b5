//! Lowers a traced or compiled graph to ONNX operators.
//!
//! Every node is rebuilt in a fresh graph. For each node the lowering tries,
//! in order:
//!
//! 1. the method-level hook of a host op payload ([`HostOp::symbolic`]),
//! 2. the function-level hook registered for the node kind,
//! 3. a structural clone.
//!
//! A hook returns one optional value per original output; `None` marks an
//! output it does not produce, which is an error only if something uses it.
//!
//! [`HostOp::symbolic`]: crate::ir::HostOp::symbolic

use crate::ir::{AttributeValue, Graph, Node, NodeId, Symbol, Type, ValueId};
use crate::tensor::Tensor;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Replacement outputs produced by a symbolic hook.
pub type SymbolicOutputs = Vec<Option<ValueId>>;

/// Function-level lowering of one node kind.
///
/// Returning `Ok(None)` falls back to cloning the node.
pub trait SymbolicFn: Send + Sync {
    fn lower(
        &self,
        ctx: &mut SymbolicContext<'_>,
        inputs: &[Option<ValueId>],
    ) -> Result<Option<SymbolicOutputs>>;
}

impl<F> SymbolicFn for F
where
    F: Fn(&mut SymbolicContext<'_>, &[Option<ValueId>]) -> Result<Option<SymbolicOutputs>>
        + Send
        + Sync,
{
    fn lower(
        &self,
        ctx: &mut SymbolicContext<'_>,
        inputs: &[Option<ValueId>],
    ) -> Result<Option<SymbolicOutputs>> {
        self(ctx, inputs)
    }
}

/// Compile-time registered lowering for a node kind.
pub struct SymbolicDef {
    pub kind: &'static str,
    pub lower: fn(&mut SymbolicContext<'_>, &[Option<ValueId>]) -> Result<Option<SymbolicOutputs>>,
}

#[linkme::distributed_slice]
pub static SYMBOLIC_DEFS: [SymbolicDef] = [..];

pub fn all_symbolic_defs() -> &'static [SymbolicDef] {
    &SYMBOLIC_DEFS
}

/// Lookup table from node kind to lowering.
///
/// Runtime registrations take precedence over the compile-time definitions.
pub struct SymbolicRegistry {
    overrides: RwLock<HashMap<String, Arc<dyn SymbolicFn>>>,
    use_builtins: bool,
}

impl Default for SymbolicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolicRegistry {
    /// Registry backed by the compile-time definitions.
    pub fn new() -> Self {
        SymbolicRegistry {
            overrides: RwLock::new(HashMap::new()),
            use_builtins: true,
        }
    }

    /// Registry with no lowering at all; only explicit registrations apply.
    pub fn empty() -> Self {
        SymbolicRegistry {
            overrides: RwLock::new(HashMap::new()),
            use_builtins: false,
        }
    }

    pub fn register(&self, kind: &str, lowering: Arc<dyn SymbolicFn>) {
        self.overrides
            .write()
            .expect("symbolic registry poisoned")
            .insert(kind.to_string(), lowering);
    }

    pub fn unregister(&self, kind: &str) -> bool {
        self.overrides
            .write()
            .expect("symbolic registry poisoned")
            .remove(kind)
            .is_some()
    }

    fn lower(
        &self,
        kind: &Symbol,
        ctx: &mut SymbolicContext<'_>,
        inputs: &[Option<ValueId>],
    ) -> Result<Option<SymbolicOutputs>> {
        let custom = self
            .overrides
            .read()
            .expect("symbolic registry poisoned")
            .get(kind.as_str())
            .cloned();
        if let Some(lowering) = custom {
            return lowering.lower(ctx, inputs);
        }
        if self.use_builtins {
            if let Some(def) = SYMBOLIC_DEFS.iter().find(|def| def.kind == kind.as_str()) {
                return (def.lower)(ctx, inputs);
            }
        }
        Ok(None)
    }
}

/// Process-wide registry used when callers do not bring their own.
pub fn global_registry() -> &'static SymbolicRegistry {
    static GLOBAL: OnceLock<SymbolicRegistry> = OnceLock::new();
    GLOBAL.get_or_init(SymbolicRegistry::new)
}

/// Emission context handed to symbolic hooks.
pub struct SymbolicContext<'a> {
    target: &'a mut Graph,
    source: &'a Graph,
    node: NodeId,
}

impl<'a> SymbolicContext<'a> {
    /// The node being lowered, in the source graph.
    pub fn node(&self) -> &Node {
        self.source.node(self.node)
    }

    pub fn source_graph(&self) -> &Graph {
        self.source
    }

    pub fn graph(&mut self) -> &mut Graph {
        self.target
    }

    /// Appends an `onnx::<op_type>` node with the source node's location.
    pub fn op(
        &mut self,
        op_type: &str,
        inputs: &[ValueId],
        num_outputs: usize,
        configure: impl FnOnce(&mut Node),
    ) -> Result<Vec<ValueId>> {
        let location = self.node().source_location().cloned();
        let node = self.target.create_node(Symbol::onnx(op_type), inputs, num_outputs)?;
        self.target.append_node(node);
        let created = self.target.node_mut(node);
        created.set_source_location(location);
        configure(&mut *created);
        Ok(created.outputs().to_vec())
    }

    /// Single-output [`SymbolicContext::op`].
    pub fn op1(
        &mut self,
        op_type: &str,
        inputs: &[ValueId],
        configure: impl FnOnce(&mut Node),
    ) -> Result<ValueId> {
        Ok(self.op(op_type, inputs, 1, configure)?[0])
    }

    pub fn constant(&mut self, tensor: Tensor) -> ValueId {
        let node = self.target.create_constant(tensor);
        self.target.append_node(node);
        self.target.node(node).output(0)
    }
}

/// Requires every hook input to be present.
pub fn require_inputs(kind: &Symbol, inputs: &[Option<ValueId>]) -> Result<Vec<ValueId>> {
    inputs
        .iter()
        .enumerate()
        .map(|(idx, value)| value.ok_or_else(|| anyhow!("input {idx} of {kind} is absent")))
        .collect()
}

/// Builds the ONNX lowering of `graph`.
///
/// Returns the new graph and the map from every old value to its replacement
/// (`None` for outputs a hook declined to produce).
pub fn to_onnx(
    graph: &Graph,
    registry: &SymbolicRegistry,
) -> Result<(Graph, HashMap<ValueId, Option<ValueId>>)> {
    let mut target = Graph::new();
    target.set_stage(graph.stage());
    let mut env: HashMap<ValueId, Option<ValueId>> = HashMap::new();

    for &input in graph.inputs() {
        let value = target.add_input();
        target.copy_value_metadata(graph, input, value)?;
        env.insert(input, Some(value));
    }

    for node in graph.nodes() {
        let n = graph.node(node);
        target.set_new_node_stage(n.stage());
        let inputs: Vec<Option<ValueId>> = n
            .inputs()
            .iter()
            .map(|v| {
                env.get(v)
                    .copied()
                    .ok_or_else(|| anyhow!("dangling reference to %{} in {}", graph.value_name(*v), n.kind()))
            })
            .collect::<Result<_>>()?;

        let mut ctx = SymbolicContext {
            target: &mut target,
            source: graph,
            node,
        };
        let mut outputs = match n.host_op() {
            Some(op) => op
                .symbolic(&mut ctx, &inputs)
                .transpose()
                .with_context(|| format!("symbolic of host op {} failed", op.name()))?,
            None => None,
        };
        if outputs.is_none() {
            outputs = registry
                .lower(n.kind(), &mut ctx, &inputs)
                .with_context(|| format!("symbolic for {} failed", n.kind()))?;
        }

        match outputs {
            Some(outputs) => {
                if outputs.len() != n.outputs().len() {
                    bail!(
                        "symbolic for {} produced an incorrect number of outputs (expected {}, but got {})",
                        n.kind(),
                        n.outputs().len(),
                        outputs.len()
                    );
                }
                for (&old, new) in n.outputs().iter().zip(outputs) {
                    if let Some(new) = new {
                        if matches!(target.value_type(new), Type::Dynamic) {
                            let ty = graph.value_type(old).clone();
                            target.set_value_type(new, ty);
                        }
                    }
                    env.insert(old, new);
                }
                tracing::trace!(kind = %n.kind(), "lowered with symbolic");
            }
            None => {
                let clone = target.create_clone(graph, node, |v| {
                    env.get(&v).copied().flatten().ok_or_else(|| {
                        anyhow!(
                            "{} uses %{}, which its producer's symbolic did not produce",
                            n.kind(),
                            graph.value_name(v)
                        )
                    })
                })?;
                lower_subgraph_attributes(&mut target, clone, registry)?;
                target.append_node(clone);
                for (&old, &new) in n.outputs().iter().zip(target.node(clone).outputs()) {
                    env.insert(old, Some(new));
                }
            }
        }
    }

    for &output in graph.outputs() {
        match env.get(&output).copied().flatten() {
            Some(value) => {
                target.register_output(value)?;
            }
            None => bail!(
                "graph output %{} was not produced by the lowering",
                graph.value_name(output)
            ),
        }
    }
    Ok((target, env))
}

fn lower_subgraph_attributes(target: &mut Graph, node: NodeId, registry: &SymbolicRegistry) -> Result<()> {
    let names: Vec<String> = target
        .node(node)
        .attributes()
        .iter()
        .filter(|(_, v)| matches!(v, AttributeValue::G(_) | AttributeValue::Gs(_)))
        .map(|(name, _)| name.to_string())
        .collect();
    for name in names {
        let lowered = match target.node(node).attributes().get(&name) {
            Some(AttributeValue::G(g)) => AttributeValue::G(Arc::new(to_onnx(g, registry)?.0)),
            Some(AttributeValue::Gs(gs)) => AttributeValue::Gs(
                gs.iter()
                    .map(|g| to_onnx(g, registry).map(|(lowered, _)| Arc::new(lowered)))
                    .collect::<Result<_>>()?,
            ),
            _ => continue,
        };
        target.node_mut(node).attributes_mut().set(&name, lowered);
    }
    Ok(())
}
