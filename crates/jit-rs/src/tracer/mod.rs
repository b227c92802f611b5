//! Records operations on live runtime values into a graph.
//!
//! ```text
//!   enter(inputs) ──► TracingState { graph, active }
//!        │                 ▲
//!        ▼                 │ weak (state id, Weak<TracingState>, ValueId)
//!   pre_record_trace ── Variable ── post_record_trace
//!        │
//!        ▼
//!   exit(outputs) ──► graph outputs, inactive, backward hook
//! ```
//!
//! A variable may be associated with several tracing states at once; every
//! lookup names the state it is interested in, and only one active state may
//! be involved in a single operation.

mod state;
mod variable;

pub use state::{BackwardCapture, StageFlags, TracingState};
pub use variable::{Variable, VariableFlags};

use crate::env;
use crate::ir::{kinds, IrError, LintError, Node, NodeId, SourceRange, Symbol, TensorType, ValueId};
use crate::tensor::Tensor;
use state::TracingInner;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error(
        "output {output} of traced region did not have observable data dependence with trace \
         inputs; this probably indicates your program cannot be understood by the tracer"
    )]
    NoObservableDependence { output: usize },
    #[error("values from multiple tracing states are involved in a single operation")]
    MixedTracingStates,
    #[error("none of the given values is being traced")]
    NotTracing,
    #[error("trace input {index} is undefined")]
    UndefinedInput { index: usize },
    #[error("a trace needs at least one stage, got {num_stages}")]
    InvalidStageCount { num_stages: usize },
    #[error("cannot start stage {stage}: the trace was created with {num_stages} stages")]
    StageLimit { stage: usize, num_stages: usize },
    #[error("tracing state is still active")]
    StillActive,
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error("traced graph failed lint: {0}")]
    Lint(#[from] LintError),
    #[error(transparent)]
    External(#[from] anyhow::Error),
}

/// Argument of [`enter`].
#[derive(Debug, Clone)]
pub enum TraceInput {
    /// Traced runtime value; associated with its graph input.
    Variable(Variable),
    /// Parameter or buffer storage; looked up by storage identity instead.
    Buffer(Tensor),
}

/// Starts a single-stage-capable trace over `inputs`.
///
/// Returns the new state and the variable inputs, where a variable that was
/// already associated with this state is replaced by an alias. Buffers are
/// registered in the state's buffer map and not returned.
pub fn enter(
    inputs: Vec<TraceInput>,
    num_stages: usize,
) -> Result<(Arc<TracingState>, Vec<Variable>), TraceError> {
    enter_with_backward(inputs, num_stages, None)
}

/// Like [`enter`], with a hook that captures the backward stage at exit.
pub fn enter_with_backward(
    inputs: Vec<TraceInput>,
    num_stages: usize,
    backward: Option<Arc<dyn BackwardCapture>>,
) -> Result<(Arc<TracingState>, Vec<Variable>), TraceError> {
    if num_stages == 0 {
        return Err(TraceError::InvalidStageCount { num_stages });
    }
    let state = Arc::new(TracingState::new(num_stages, backward));
    let mut variables = Vec::new();
    {
        let mut inner = state.lock();
        for (index, input) in inputs.into_iter().enumerate() {
            match input {
                TraceInput::Variable(var) => {
                    if !var.is_defined() {
                        return Err(TraceError::UndefinedInput { index });
                    }
                    let var = if var.trace_in(&state).is_some() {
                        var.alias()
                    } else {
                        var
                    };
                    let value = add_traced_input(&mut inner, &state, &var);
                    tracing::trace!(state = state.id(), index, ?value, "registered trace input");
                    variables.push(var);
                }
                TraceInput::Buffer(tensor) => {
                    let value = inner.graph.add_input();
                    inner
                        .graph
                        .set_value_type(value, TensorType::from_tensor(&tensor));
                    inner.buffer_map.insert(tensor.storage_key(), value);
                }
            }
        }
        inner.var_flags[0].inputs = variables.iter().map(Variable::flags).collect();
        inner.inputs = variables.clone();
    }
    state.set_active(true);
    tracing::debug!(state = state.id(), num_stages, "entered trace");
    Ok((state, variables))
}

fn add_traced_input(inner: &mut TracingInner, state: &Arc<TracingState>, var: &Variable) -> ValueId {
    let value = inner.graph.add_input();
    if let Some(data) = var.data() {
        inner.graph.set_value_type(value, TensorType::from_tensor(data));
    }
    var.set_trace(state, value);
    value
}

/// Finishes the current stage of the trace that produced `outputs`.
///
/// Registers the outputs as graph outputs, deactivates the state and runs the
/// backward hook, if any, before clearing the input bookkeeping.
pub fn exit(outputs: &[Variable]) -> Result<(), TraceError> {
    let state = get_tracing_state(outputs)?.ok_or(TraceError::NotTracing)?;
    exit_stage(&state, outputs)?;
    let inputs = state.lock().inputs.clone();
    if let Some(hook) = state.backward().cloned() {
        hook.capture(&state, &inputs, outputs)?;
    }
    state.lock().inputs.clear();
    Ok(())
}

/// Registers `outputs` of the stage being recorded and deactivates `state`.
pub fn exit_stage(state: &Arc<TracingState>, outputs: &[Variable]) -> Result<(), TraceError> {
    let mut inner = state.lock();
    for (index, output) in outputs.iter().enumerate() {
        let value = output_trace(&mut inner, state, output, index)?;
        inner.graph.register_output(value)?;
    }
    let stage = inner.graph.stage();
    inner.var_flags[stage].outputs = outputs.iter().map(Variable::flags).collect();
    if env::lint_on_trace_exit() {
        inner.graph.lint()?;
    }
    state.set_active(false);
    tracing::debug!(state = state.id(), stage, outputs = outputs.len(), "exited trace stage");
    Ok(())
}

/// Opens the next stage of `state` with `inputs` as new graph inputs.
pub fn enter_stage(state: &Arc<TracingState>, inputs: &[Variable]) -> Result<(), TraceError> {
    if state.is_active() {
        return Err(TraceError::StillActive);
    }
    let mut inner = state.lock();
    let stage = inner.graph.stage() + 1;
    if stage >= state.num_stages() {
        return Err(TraceError::StageLimit {
            stage,
            num_stages: state.num_stages(),
        });
    }
    inner.graph.advance_stage();
    for (index, var) in inputs.iter().enumerate() {
        if !var.is_defined() {
            return Err(TraceError::UndefinedInput { index });
        }
        add_traced_input(&mut inner, state, var);
    }
    inner.var_flags[stage].inputs = inputs.iter().map(Variable::flags).collect();
    inner.inputs = inputs.to_vec();
    drop(inner);
    state.set_active(true);
    tracing::debug!(state = state.id(), stage, "entered trace stage");
    Ok(())
}

/// Whether any of `vars` is recorded by an active tracing state.
pub fn is_tracing(vars: &[Variable]) -> bool {
    vars.iter().any(|var| !var.active_states().is_empty())
}

/// The unique active tracing state among `vars`, if any.
pub fn get_tracing_state(vars: &[Variable]) -> Result<Option<Arc<TracingState>>, TraceError> {
    let mut found: Option<Arc<TracingState>> = None;
    for var in vars {
        for state in var.active_states() {
            match &found {
                Some(existing) if existing.id() != state.id() => {
                    return Err(TraceError::MixedTracingStates)
                }
                Some(_) => {}
                None => found = Some(state),
            }
        }
    }
    Ok(found)
}

/// Graph value standing for `var` in `state`.
///
/// Values never seen before are embedded as constants, unless they are a
/// registered buffer. Undefined values become `prim::Undefined` nodes.
pub fn get_value_trace(state: &Arc<TracingState>, var: &Variable) -> ValueId {
    let mut inner = state.lock();
    value_trace(&mut inner, state, var)
}

fn value_trace(inner: &mut TracingInner, state: &Arc<TracingState>, var: &Variable) -> ValueId {
    let Some(data) = var.data() else {
        let node = inner.graph.create_undefined();
        inner.graph.insert_node(node);
        return inner.graph.node(node).output(0);
    };
    if let Some(value) = var.trace_in(state) {
        return value;
    }
    if let Some(&value) = inner.buffer_map.get(&data.storage_key()) {
        return value;
    }
    let node = inner.graph.create_constant(data.clone());
    inner.graph.insert_node(node);
    let value = inner.graph.node(node).output(0);
    var.set_trace(state, value);
    value
}

fn output_trace(
    inner: &mut TracingInner,
    state: &Arc<TracingState>,
    var: &Variable,
    output: usize,
) -> Result<ValueId, TraceError> {
    if !var.is_defined() {
        let node = inner.graph.create_undefined();
        inner.graph.insert_node(node);
        return Ok(inner.graph.node(node).output(0));
    }
    var.trace_in(state)
        .ok_or(TraceError::NoObservableDependence { output })
}

/// Node recorded by [`pre_record_trace`], completed by [`post_record_trace`].
#[derive(Debug, Clone)]
pub struct PreTraceInfo {
    state: Arc<TracingState>,
    node: NodeId,
}

impl PreTraceInfo {
    pub fn state(&self) -> &Arc<TracingState> {
        &self.state
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Edits the recorded node, e.g. to set attributes.
    pub fn configure<R>(&self, f: impl FnOnce(&mut Node) -> R) -> R {
        self.state.with_graph_mut(|graph| f(graph.node_mut(self.node)))
    }

    pub fn set_source_location(&self, location: SourceRange) {
        self.configure(|node| {
            node.set_source_location(Some(Arc::new(location)));
        });
    }
}

/// Records a node of `kind` over the traces of `inputs`, before the operation runs.
pub fn pre_record_trace(kind: Symbol, inputs: &[Variable]) -> Result<PreTraceInfo, TraceError> {
    let state = get_tracing_state(inputs)?.ok_or(TraceError::NotTracing)?;
    let node = {
        let mut inner = state.lock();
        let values: Vec<ValueId> = inputs
            .iter()
            .map(|var| value_trace(&mut inner, &state, var))
            .collect();
        let node = inner.graph.create_node(kind, &values, 0)?;
        inner.graph.insert_node(node);
        node
    };
    tracing::trace!(state = state.id(), ?node, "recorded node");
    Ok(PreTraceInfo { state, node })
}

/// Attaches `outputs` of the executed operation to the recorded node.
pub fn post_record_trace(info: &PreTraceInfo, outputs: &[Variable]) {
    let mut inner = info.state.lock();
    for output in outputs {
        let value = inner.graph.add_node_output(info.node);
        if let Some(data) = output.data() {
            inner
                .graph
                .set_value_type(value, TensorType::from_tensor(data));
            output.set_trace(&info.state, value);
        }
    }
}

/// Runs `compute` on `inputs`, recording it as one `kind` node when any input
/// is being traced.
pub fn record_op<C, F>(
    kind: Symbol,
    inputs: &[Variable],
    configure: C,
    compute: F,
) -> anyhow::Result<Vec<Variable>>
where
    C: FnOnce(&mut Node),
    F: FnOnce(&[Variable]) -> anyhow::Result<Vec<Variable>>,
{
    if !is_tracing(inputs) {
        return compute(inputs);
    }
    let info = pre_record_trace(kind, inputs)?;
    info.configure(configure);
    let outputs = compute(inputs)?;
    post_record_trace(&info, &outputs);
    Ok(outputs)
}

/// Records an opaque `prim::Eval` node for a region the backward hook cannot
/// trace; `outputs` become the node's outputs.
pub fn nontraceable_backward_subgraph(
    inputs: &[Variable],
    outputs: &[Variable],
) -> Result<NodeId, TraceError> {
    let info = pre_record_trace(kinds::EVAL, inputs)?;
    post_record_trace(&info, outputs);
    Ok(info.node)
}
