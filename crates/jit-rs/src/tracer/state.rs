use super::variable::{Variable, VariableFlags};
use super::TraceError;
use crate::ir::{Graph, ValueId};
use crate::passes::onnx::{to_onnx, SymbolicRegistry};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static TRACING_STATE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Bridge to the autograd subsystem, invoked when a trace exits.
///
/// Implementations either record a backward stage into the same graph
/// (through [`enter_stage`](super::enter_stage) / [`exit_stage`](super::exit_stage))
/// or mark opaque regions with
/// [`nontraceable_backward_subgraph`](super::nontraceable_backward_subgraph).
pub trait BackwardCapture: Send + Sync {
    fn capture(
        &self,
        state: &Arc<TracingState>,
        inputs: &[Variable],
        outputs: &[Variable],
    ) -> anyhow::Result<()>;
}

/// Input and output flags of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageFlags {
    pub inputs: Vec<VariableFlags>,
    pub outputs: Vec<VariableFlags>,
}

pub(crate) struct TracingInner {
    pub(crate) graph: Graph,
    /// Storage identity of registered buffers to their graph input.
    pub(crate) buffer_map: HashMap<usize, ValueId>,
    pub(crate) inputs: Vec<Variable>,
    pub(crate) var_flags: Vec<StageFlags>,
}

/// One capture session: the graph under construction plus its bookkeeping.
pub struct TracingState {
    id: u64,
    active: AtomicBool,
    num_stages: usize,
    backward: Option<Arc<dyn BackwardCapture>>,
    inner: Mutex<TracingInner>,
}

impl TracingState {
    pub(crate) fn new(num_stages: usize, backward: Option<Arc<dyn BackwardCapture>>) -> Self {
        TracingState {
            id: TRACING_STATE_COUNTER.fetch_add(1, Ordering::Relaxed),
            active: AtomicBool::new(false),
            num_stages,
            backward,
            inner: Mutex::new(TracingInner {
                graph: Graph::new(),
                buffer_map: HashMap::new(),
                inputs: Vec::new(),
                var_flags: vec![StageFlags::default(); num_stages],
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn num_stages(&self) -> usize {
        self.num_stages
    }

    pub(crate) fn backward(&self) -> Option<&Arc<dyn BackwardCapture>> {
        self.backward.as_ref()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TracingInner> {
        self.inner.lock().expect("tracing state poisoned")
    }

    /// Stage currently being recorded.
    pub fn stage(&self) -> usize {
        self.lock().graph.stage()
    }

    /// All stages have been recorded and the last one has exited.
    pub fn is_complete(&self) -> bool {
        !self.is_active() && self.stage() + 1 >= self.num_stages
    }

    pub fn with_graph<R>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        f(&self.lock().graph)
    }

    pub fn with_graph_mut<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        f(&mut self.lock().graph)
    }

    /// Moves the captured graph out, leaving an empty one behind.
    pub fn take_graph(&self) -> Graph {
        std::mem::take(&mut self.lock().graph)
    }

    pub fn var_flags(&self, stage: usize) -> Option<StageFlags> {
        self.lock().var_flags.get(stage).cloned()
    }

    pub fn buffer_value(&self, buffer_key: usize) -> Option<ValueId> {
        self.lock().buffer_map.get(&buffer_key).copied()
    }

    /// Replaces the captured graph by its ONNX lowering, remapping buffer inputs.
    pub fn lower_to_onnx(&self, registry: &SymbolicRegistry) -> anyhow::Result<()> {
        if self.is_active() {
            return Err(TraceError::StillActive.into());
        }
        let mut inner = self.lock();
        let (lowered, env) = to_onnx(&inner.graph, registry)?;
        let remapped = inner
            .buffer_map
            .iter()
            .filter_map(|(&key, value)| env.get(value).copied().flatten().map(|v| (key, v)))
            .collect();
        inner.buffer_map = remapped;
        inner.graph = lowered;
        tracing::debug!(state = self.id, "lowered trace to onnx");
        Ok(())
    }
}

impl fmt::Debug for TracingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingState")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("num_stages", &self.num_stages)
            .finish_non_exhaustive()
    }
}
