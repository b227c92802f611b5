//! Runtime values observed by the tracer.
//!
//! Each defined [`Variable`] carries a list of `(state id, weak state, value)`
//! associations, one per tracing state that has recorded it. Associations of
//! dropped states are pruned whenever the list is touched.

use super::state::TracingState;
use crate::ir::ValueId;
use crate::tensor::Tensor;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

static VARIABLE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Flags snapshotted per stage for the inputs and outputs of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VariableFlags {
    pub requires_grad: bool,
    pub is_volatile: bool,
    pub was_undefined: bool,
}

struct TraceSlot {
    state_id: u64,
    state: Weak<TracingState>,
    value: ValueId,
}

struct VariableImpl {
    id: u64,
    data: Tensor,
    requires_grad: bool,
    is_volatile: bool,
    traces: Mutex<Vec<TraceSlot>>,
}

/// A tensor as seen by the tracer, or an undefined placeholder.
///
/// Clones share identity and trace associations.
#[derive(Clone, Default)]
pub struct Variable {
    inner: Option<Arc<VariableImpl>>,
}

impl Variable {
    pub fn new(data: Tensor, requires_grad: bool) -> Self {
        Self::with_flags(data, requires_grad, false)
    }

    pub fn with_flags(data: Tensor, requires_grad: bool, is_volatile: bool) -> Self {
        Variable {
            inner: Some(Arc::new(VariableImpl {
                id: VARIABLE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                data,
                requires_grad,
                is_volatile,
                traces: Mutex::new(Vec::new()),
            })),
        }
    }

    pub fn undefined() -> Self {
        Variable { inner: None }
    }

    pub fn is_defined(&self) -> bool {
        self.inner.is_some()
    }

    /// Identity of this runtime value; `None` when undefined.
    pub fn id(&self) -> Option<u64> {
        self.inner.as_ref().map(|inner| inner.id)
    }

    pub fn data(&self) -> Option<&Tensor> {
        self.inner.as_ref().map(|inner| &inner.data)
    }

    pub fn requires_grad(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.requires_grad)
    }

    pub fn flags(&self) -> VariableFlags {
        match &self.inner {
            Some(inner) => VariableFlags {
                requires_grad: inner.requires_grad,
                is_volatile: inner.is_volatile,
                was_undefined: false,
            },
            None => VariableFlags {
                was_undefined: true,
                ..VariableFlags::default()
            },
        }
    }

    /// New runtime value sharing storage with `self` but none of its identity
    /// or trace associations (a no-op reshape).
    pub fn alias(&self) -> Variable {
        match &self.inner {
            Some(inner) => Variable::with_flags(
                inner.data.clone(),
                inner.requires_grad,
                inner.is_volatile,
            ),
            None => Variable::undefined(),
        }
    }

    pub fn same_as(&self, other: &Variable) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn slots(&self) -> Option<MutexGuard<'_, Vec<TraceSlot>>> {
        let inner = self.inner.as_ref()?;
        let mut slots = inner
            .traces
            .lock()
            .expect("variable trace list poisoned");
        slots.retain(|slot| slot.state.strong_count() > 0);
        Some(slots)
    }

    /// Value recorded for this variable by `state`, if any.
    pub(crate) fn trace_in(&self, state: &TracingState) -> Option<ValueId> {
        let slots = self.slots()?;
        slots
            .iter()
            .find(|slot| slot.state_id == state.id())
            .map(|slot| slot.value)
    }

    pub(crate) fn set_trace(&self, state: &Arc<TracingState>, value: ValueId) {
        let Some(mut slots) = self.slots() else {
            return;
        };
        match slots.iter_mut().find(|slot| slot.state_id == state.id()) {
            Some(slot) => slot.value = value,
            None => slots.push(TraceSlot {
                state_id: state.id(),
                state: Arc::downgrade(state),
                value,
            }),
        }
    }

    /// Live tracing states currently recording this variable.
    pub(crate) fn active_states(&self) -> Vec<Arc<TracingState>> {
        let Some(slots) = self.slots() else {
            return Vec::new();
        };
        slots
            .iter()
            .filter_map(|slot| slot.state.upgrade())
            .filter(|state| state.is_active())
            .collect()
    }

    /// Number of associations that survive pruning.
    pub fn trace_count(&self) -> usize {
        self.slots().map(|slots| slots.len()).unwrap_or(0)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("Variable")
                .field("id", &inner.id)
                .field("data", &inner.data)
                .field("requires_grad", &inner.requires_grad)
                .finish(),
            None => f.write_str("Variable(undefined)"),
        }
    }
}
