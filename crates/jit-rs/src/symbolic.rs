//! Operator-overloaded construction of common node patterns.
//!
//! A [`SymbolicVariable`] is a copyable handle pairing a value with the
//! `RefCell<Graph>` that owns it. Every method creates one node at the graph's
//! insertion point, wires its inputs, sets attributes and returns the
//! outputs. Scalars become single-element tensor attributes instead of graph
//! inputs. Element-wise ops give their result the contiguous type of the
//! first operand; shape ops leave the result untyped.
//!
//! ```text
//! let g = RefCell::new(Graph::new());
//! let x = SymbolicVariable::as_new_input(&g);
//! let y = (x * x + 1.0).sigmoid();
//! ```
//!
//! Operators panic if emission fails, which only happens when operands come
//! from different graphs; the `try_*` forms report that as an error instead.

use crate::ir::{kinds, Graph, IrError, NodeId, Symbol, Type, ValueId};
use crate::tensor::{ScalarType, Tensor};
use std::cell::RefCell;
use std::ops::{Add, Mul, Neg, Sub};

#[derive(Clone, Copy)]
pub struct SymbolicVariable<'g> {
    graph: &'g RefCell<Graph>,
    value: ValueId,
}

impl std::fmt::Debug for SymbolicVariable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SymbolicVariable").field(&self.value).finish()
    }
}

impl<'g> SymbolicVariable<'g> {
    pub fn wrap(graph: &'g RefCell<Graph>, value: ValueId) -> Self {
        SymbolicVariable { graph, value }
    }

    /// Adds a fresh graph input and wraps it.
    pub fn as_new_input(graph: &'g RefCell<Graph>) -> Self {
        let value = graph.borrow_mut().add_input();
        Self::wrap(graph, value)
    }

    pub fn value(self) -> ValueId {
        self.value
    }

    pub fn graph(self) -> &'g RefCell<Graph> {
        self.graph
    }

    pub fn ty(self) -> Type {
        self.graph.borrow().value_type(self.value).clone()
    }

    /// Creates a node of `kind` over `inputs` at the insertion point.
    pub fn try_create(
        graph: &'g RefCell<Graph>,
        kind: Symbol,
        inputs: &[SymbolicVariable<'g>],
        num_outputs: usize,
    ) -> Result<(NodeId, Vec<SymbolicVariable<'g>>), IrError> {
        let values: Vec<ValueId> = inputs.iter().map(|v| v.value).collect();
        let mut g = graph.borrow_mut();
        let node = g.create_node(kind, &values, num_outputs)?;
        g.insert_node(node);
        let outputs = g
            .node(node)
            .outputs()
            .iter()
            .map(|&value| SymbolicVariable { graph, value })
            .collect();
        Ok((node, outputs))
    }

    /// Like [`SymbolicVariable::try_create`], configuring the node through `configure`.
    pub fn create(
        graph: &'g RefCell<Graph>,
        kind: Symbol,
        inputs: &[SymbolicVariable<'g>],
        num_outputs: usize,
        configure: impl FnOnce(&mut Graph, NodeId),
    ) -> Vec<SymbolicVariable<'g>> {
        let (node, outputs) = Self::try_create(graph, kind, inputs, num_outputs)
            .expect("symbolic node emission failed");
        configure(&mut graph.borrow_mut(), node);
        outputs
    }

    fn unary(self, name: &str, configure: impl FnOnce(&mut Graph, NodeId)) -> Self {
        let out = Self::create(self.graph, Symbol::aten(name), &[self], 1, configure)[0];
        out.type_like(self)
    }

    fn untyped(self, name: &str, configure: impl FnOnce(&mut Graph, NodeId)) -> Self {
        Self::create(self.graph, Symbol::aten(name), &[self], 1, configure)[0]
    }

    fn try_binary(self, name: &str, rhs: Self) -> Result<Self, IrError> {
        let (node, outputs) = Self::try_create(self.graph, Symbol::aten(name), &[self, rhs], 1)?;
        if name == "add" || name == "sub" {
            self.graph
                .borrow_mut()
                .node_mut(node)
                .attributes_mut()
                .set_t("alpha", Tensor::scalar(1.0, ScalarType::Long));
        }
        Ok(outputs[0].type_like(self))
    }

    fn scalar_op(self, name: &str, rhs: f64) -> Self {
        self.unary(name, |g, n| {
            let attrs = g.node_mut(n).attributes_mut();
            if name == "add" || name == "sub" {
                attrs.set_t("alpha", Tensor::scalar(1.0, ScalarType::Long));
            }
            attrs.set_t("other", Tensor::scalar(rhs, ScalarType::Double));
        })
    }

    /// Gives this value the contiguous type of `other`.
    pub fn type_like(self, other: Self) -> Self {
        let ty = other.ty().contiguous();
        self.graph.borrow_mut().set_value_type(self.value, ty);
        self
    }

    pub fn try_add(self, rhs: Self) -> Result<Self, IrError> {
        self.try_binary("add", rhs)
    }

    pub fn try_sub(self, rhs: Self) -> Result<Self, IrError> {
        self.try_binary("sub", rhs)
    }

    pub fn try_mul(self, rhs: Self) -> Result<Self, IrError> {
        self.try_binary("mul", rhs)
    }

    pub fn try_div(self, rhs: Self) -> Result<Self, IrError> {
        self.try_binary("div", rhs)
    }

    pub fn div(self, rhs: Self) -> Self {
        self.try_div(rhs).expect("symbolic div emission failed")
    }

    /// Matrix product of two 2-d values.
    pub fn mm(self, rhs: Self) -> Self {
        Self::create(self.graph, Symbol::aten("mm"), &[self, rhs], 1, |_, _| {})[0]
    }

    pub fn matmul(self, rhs: Self) -> Self {
        Self::create(self.graph, Symbol::aten("matmul"), &[self, rhs], 1, |_, _| {})[0]
    }

    /// Transpose of a 2-d value.
    pub fn t(self) -> Self {
        self.untyped("t", |_, _| {})
    }

    pub fn sigmoid(self) -> Self {
        self.unary("sigmoid", |_, _| {})
    }

    pub fn tanh(self) -> Self {
        self.unary("tanh", |_, _| {})
    }

    /// Splits into `chunks` pieces along `dim`.
    pub fn chunk(self, chunks: usize, dim: i64) -> Vec<Self> {
        Self::create(self.graph, Symbol::aten("chunk"), &[self], chunks, |g, n| {
            g.node_mut(n)
                .set_i("chunks", chunks as i64)
                .set_i("dim", dim);
        })
    }

    pub fn narrow(self, dim: i64, start: i64, length: i64) -> Self {
        self.untyped("narrow", |g, n| {
            g.node_mut(n)
                .set_i("dim", dim)
                .set_i("start", start)
                .set_i("length", length);
        })
    }

    /// Concatenates `inputs` along `dim`.
    ///
    /// # Panics
    ///
    /// Panics if `inputs` is empty; the graph is taken from the first input.
    pub fn cat(inputs: &[Self], dim: i64) -> Self {
        let graph = match inputs.first() {
            Some(first) => first.graph,
            None => panic!("cat requires at least one input"),
        };
        Self::create(graph, Symbol::aten("cat"), inputs, 1, |g, n| {
            g.node_mut(n).set_i("dim", dim);
        })[0]
    }

    /// Sum over all elements.
    pub fn sum(self) -> Self {
        self.untyped("sum", |_, _| {})
    }

    pub fn sum_dim(self, dim: i64, keepdim: bool) -> Self {
        self.untyped("sum", |g, n| {
            g.node_mut(n)
                .set_i("dim", dim)
                .set_i("keepdim", keepdim as i64);
        })
    }

    pub fn squeeze(self, dim: i64) -> Self {
        self.untyped("squeeze", |g, n| {
            g.node_mut(n).set_i("dim", dim);
        })
    }

    pub fn unsqueeze(self, dim: i64) -> Self {
        self.untyped("unsqueeze", |g, n| {
            g.node_mut(n).set_i("dim", dim);
        })
    }

    pub fn view(self, sizes: Vec<i64>) -> Self {
        self.untyped("view", |g, n| {
            g.node_mut(n).set_is("size", sizes);
        })
    }

    /// Broadcasts to `sizes`.
    pub fn expand(self, sizes: Vec<i64>) -> Self {
        self.untyped("expand", |g, n| {
            g.node_mut(n).set_is("size", sizes);
        })
    }

    /// Embeds `tensor` as a constant node.
    pub fn constant(graph: &'g RefCell<Graph>, tensor: Tensor) -> Self {
        let mut g = graph.borrow_mut();
        let node = g.create_constant(tensor);
        g.insert_node(node);
        let value = g.node(node).output(0);
        SymbolicVariable { graph, value }
    }

    pub fn is_constant(self) -> bool {
        let g = self.graph.borrow();
        g.producer(self.value)
            .map(|node| g.node(node).kind() == &kinds::CONSTANT)
            .unwrap_or(false)
    }
}

impl<'g> Add for SymbolicVariable<'g> {
    type Output = SymbolicVariable<'g>;

    fn add(self, rhs: Self) -> Self::Output {
        self.try_add(rhs).expect("symbolic add emission failed")
    }
}

impl<'g> Add<f64> for SymbolicVariable<'g> {
    type Output = SymbolicVariable<'g>;

    fn add(self, rhs: f64) -> Self::Output {
        self.scalar_op("add", rhs)
    }
}

impl<'g> Sub for SymbolicVariable<'g> {
    type Output = SymbolicVariable<'g>;

    fn sub(self, rhs: Self) -> Self::Output {
        self.try_sub(rhs).expect("symbolic sub emission failed")
    }
}

impl<'g> Mul for SymbolicVariable<'g> {
    type Output = SymbolicVariable<'g>;

    fn mul(self, rhs: Self) -> Self::Output {
        self.try_mul(rhs).expect("symbolic mul emission failed")
    }
}

impl<'g> Mul<f64> for SymbolicVariable<'g> {
    type Output = SymbolicVariable<'g>;

    fn mul(self, rhs: f64) -> Self::Output {
        self.scalar_op("mul", rhs)
    }
}

impl<'g> Neg for SymbolicVariable<'g> {
    type Output = SymbolicVariable<'g>;

    fn neg(self) -> Self::Output {
        self.unary("neg", |_, _| {})
    }
}
