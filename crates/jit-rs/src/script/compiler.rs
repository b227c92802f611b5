//! Lowers parsed definitions to graphs.
//!
//! Control flow becomes nodes with subgraph attributes:
//!
//! ```text
//! outs = prim::If(cond, captures...)
//!          then_branch(captures...) -> outs
//!          else_branch(captures...) -> outs
//!
//! outs = prim::While(cond, carried..., captures...)
//!          body(carried..., captures...) -> (next_cond, carried...)
//! ```
//!
//! A block reads enclosing values through extra subgraph inputs ("captures"),
//! added the first time the block uses them. Names assigned in one branch of
//! an `if` and visible in the other (or before it) become its outputs; names
//! assigned in a loop body and defined before the loop are carried.

use super::parser::{parse_program, ParseError};
use super::sugared::{ModuleValue, Resolver, SimpleValue, SugaredValue};
use super::tree::{AssignKind, BinOp, Def, Expr, Ident, Stmt, UnaryOp};
use crate::ir::{kinds, Graph, IrError, NodeId, SourceRange, Symbol, TensorType, Type, ValueId};
use crate::tensor::Tensor;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{message}\n{range}")]
    Semantic { message: String, range: SourceRange },
}

impl CompileError {
    pub fn at(range: &SourceRange, message: impl Into<String>) -> Self {
        CompileError::Semantic {
            message: message.into(),
            range: range.clone(),
        }
    }

    pub fn range(&self) -> &SourceRange {
        match self {
            CompileError::Parse(err) => &err.range,
            CompileError::Semantic { range, .. } => range,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CompileError::Parse(err) => &err.message,
            CompileError::Semantic { message, .. } => message,
        }
    }
}

/// Graph input of a method bound to a module parameter.
#[derive(Debug, Clone)]
pub struct MemberInput {
    pub name: String,
    pub value: ValueId,
    pub tensor: Tensor,
}

/// A compiled definition.
///
/// Graph inputs are the explicit parameters followed by the member inputs,
/// so [`Method::initializers`] lines up with the trailing inputs for export.
#[derive(Debug)]
pub struct Method {
    name: String,
    graph: Graph,
    num_params: usize,
    members: Vec<MemberInput>,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    /// Number of explicit parameters (excluding a bound `self`).
    pub fn num_params(&self) -> usize {
        self.num_params
    }

    pub fn members(&self) -> &[MemberInput] {
        &self.members
    }

    /// Tensors of the member inputs, in input order.
    pub fn initializers(&self) -> Vec<Tensor> {
        self.members.iter().map(|m| m.tensor.clone()).collect()
    }
}

/// Named parameters, submodules and compiled methods.
#[derive(Debug, Default)]
pub struct Module {
    parameters: RwLock<Vec<(String, Tensor)>>,
    submodules: RwLock<Vec<(String, Arc<Module>)>>,
    methods: RwLock<Vec<Arc<Method>>>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a parameter.
    pub fn register_parameter(&self, name: &str, tensor: Tensor) {
        let mut parameters = self.parameters.write().expect("module parameters poisoned");
        match parameters.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = tensor,
            None => parameters.push((name.to_string(), tensor)),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<Tensor> {
        self.parameters
            .read()
            .expect("module parameters poisoned")
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.clone())
    }

    pub fn register_module(&self, name: &str, module: Arc<Module>) {
        let mut submodules = self.submodules.write().expect("module submodules poisoned");
        match submodules.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = module,
            None => submodules.push((name.to_string(), module)),
        }
    }

    pub fn submodule(&self, name: &str) -> Option<Arc<Module>> {
        self.submodules
            .read()
            .expect("module submodules poisoned")
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| Arc::clone(m))
    }

    pub fn method(&self, name: &str) -> Option<Arc<Method>> {
        self.methods
            .read()
            .expect("module methods poisoned")
            .iter()
            .find(|m| m.name() == name)
            .cloned()
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods
            .read()
            .expect("module methods poisoned")
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    fn add_method(&self, method: Method) {
        self.methods
            .write()
            .expect("module methods poisoned")
            .push(Arc::new(method));
    }
}

/// Compiles `definitions` into methods of `module`.
///
/// With `self_value`, the first parameter of every definition is bound to it
/// instead of becoming a graph input. Definitions are added one by one: a
/// failure leaves earlier methods in place and adds nothing for the failing
/// definition or those after it.
pub fn define_methods_in_module(
    module: &Module,
    definitions: &[Def],
    resolver: &Resolver,
    self_value: Option<Arc<dyn SugaredValue>>,
) -> Result<(), CompileError> {
    for def in definitions {
        if module.method(&def.name.name).is_some() {
            return Err(CompileError::at(
                &def.name.range,
                format!("method '{}' is already defined", def.name.name),
            ));
        }
        let method = FunctionCompiler::compile(def, resolver, self_value.clone())?;
        module.add_method(method);
    }
    Ok(())
}

/// Parses `source` and compiles every definition into `module`.
pub fn define_methods_from_source(
    module: &Module,
    source: &str,
    resolver: &Resolver,
    self_value: Option<Arc<dyn SugaredValue>>,
) -> Result<(), CompileError> {
    let definitions = parse_program(source)?;
    define_methods_in_module(module, &definitions, resolver, self_value)
}

/// Compiles `module`'s methods with `self` bound to the module itself.
pub fn define_module_methods(
    module: &Arc<Module>,
    source: &str,
    resolver: &Resolver,
) -> Result<(), CompileError> {
    let self_value: Arc<dyn SugaredValue> = Arc::new(ModuleValue::new(Arc::clone(module)));
    define_methods_from_source(module, source, resolver, Some(self_value))
}

/// Compiles a free function.
pub fn compile_function(def: &Def, resolver: &Resolver) -> Result<Graph, CompileError> {
    FunctionCompiler::compile(def, resolver, None).map(Method::into_graph)
}

struct Frame {
    graph: Graph,
    env: HashMap<String, Arc<dyn SugaredValue>>,
    /// (enclosing value, subgraph input) pairs, in input order.
    captures: Vec<(ValueId, ValueId)>,
}

impl Frame {
    fn new() -> Self {
        Frame {
            graph: Graph::new(),
            env: HashMap::new(),
            captures: Vec::new(),
        }
    }
}

/// Emission state of one definition: a stack of graphs, the method graph at
/// the bottom and one subgraph per open block above it.
pub struct Emitter {
    frames: Vec<Frame>,
    members: Vec<MemberInput>,
}

impl Emitter {
    fn new() -> Self {
        Emitter {
            frames: vec![Frame::new()],
            members: Vec::new(),
        }
    }

    fn top(&self) -> &Frame {
        self.frames.last().expect("emitter has no frames")
    }

    fn top_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("emitter has no frames")
    }

    /// Graph of the innermost open block.
    pub fn graph(&self) -> &Graph {
        &self.top().graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.top_mut().graph
    }

    /// Makes `value` usable in the innermost block, adding a capture input to
    /// every block between its owner and the innermost one.
    pub fn lift(&mut self, value: ValueId) -> Result<ValueId, IrError> {
        let top = self.frames.len() - 1;
        let owner = self
            .frames
            .iter()
            .position(|frame| frame.graph.id() == value.graph())
            .ok_or(IrError::ForeignValue {
                expected: self.frames[top].graph.id(),
                found: value.graph(),
            })?;
        let mut current = value;
        for depth in owner + 1..=top {
            let (outer, inner) = self.frames.split_at_mut(depth);
            let frame = &mut inner[0];
            if let Some(&(_, captured)) = frame.captures.iter().find(|(o, _)| *o == current) {
                current = captured;
                continue;
            }
            let captured = frame.graph.add_input();
            frame
                .graph
                .copy_value_metadata(&outer[depth - 1].graph, current, captured)?;
            frame.captures.push((current, captured));
            current = captured;
        }
        Ok(current)
    }

    /// Appends a node to the innermost block, tagged with `range`.
    pub fn emit_node(
        &mut self,
        kind: Symbol,
        inputs: &[ValueId],
        num_outputs: usize,
        range: &SourceRange,
    ) -> Result<NodeId, CompileError> {
        let at = |err: IrError| CompileError::at(range, err.to_string());
        let inputs = inputs
            .iter()
            .map(|&v| self.lift(v))
            .collect::<Result<Vec<_>, _>>()
            .map_err(at)?;
        let graph = self.graph_mut();
        let node = graph.create_node(kind, &inputs, num_outputs).map_err(at)?;
        graph.append_node(node);
        graph
            .node_mut(node)
            .set_source_location(Some(Arc::new(range.clone())));
        Ok(node)
    }

    pub fn emit_constant(&mut self, tensor: Tensor, range: &SourceRange) -> ValueId {
        let graph = self.graph_mut();
        let node = graph.create_constant(tensor);
        graph.append_node(node);
        graph
            .node_mut(node)
            .set_source_location(Some(Arc::new(range.clone())));
        graph.node(node).output(0)
    }

    /// Input of the method graph bound to the module parameter `name`,
    /// lifted into the innermost block.
    pub fn member(
        &mut self,
        name: &str,
        tensor: &Tensor,
        range: &SourceRange,
    ) -> Result<ValueId, CompileError> {
        let existing = self.members.iter().find(|m| m.name == name).map(|m| m.value);
        let value = match existing {
            Some(value) => value,
            None => {
                let root = &mut self.frames[0].graph;
                let value = root.add_input();
                root.set_value_type(value, TensorType::from_tensor(tensor));
                root.set_value_name(value, name)
                    .map_err(|err| CompileError::at(range, err.to_string()))?;
                self.members.push(MemberInput {
                    name: name.to_string(),
                    value,
                    tensor: tensor.clone(),
                });
                value
            }
        };
        self.lift(value)
            .map_err(|err| CompileError::at(range, err.to_string()))
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn SugaredValue>> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.env.get(name).cloned())
    }

    fn bind(&mut self, name: &str, value: Arc<dyn SugaredValue>) {
        self.top_mut().env.insert(name.to_string(), value);
    }

    fn push_frame(&mut self) {
        self.frames.push(Frame::new());
    }

    fn pop_frame(&mut self) -> Frame {
        assert!(self.frames.len() > 1, "cannot pop the method frame");
        self.frames.pop().expect("frame stack is non-empty")
    }
}

/// Body of a subgraph: statements, or a single expression whose value is the
/// only output.
enum Block<'a> {
    Stmts(&'a [Stmt]),
    Expr(&'a Expr),
}

struct FunctionCompiler<'r> {
    emitter: Emitter,
    resolver: &'r Resolver,
    globals: HashSet<String>,
}

impl<'r> FunctionCompiler<'r> {
    fn compile(
        def: &Def,
        resolver: &'r Resolver,
        self_value: Option<Arc<dyn SugaredValue>>,
    ) -> Result<Method, CompileError> {
        let mut compiler = FunctionCompiler {
            emitter: Emitter::new(),
            resolver,
            globals: HashSet::new(),
        };
        let mut params = def.params.iter();
        if let Some(self_value) = self_value {
            let Some(first) = params.next() else {
                return Err(CompileError::at(
                    &def.name.range,
                    format!(
                        "methods must take 'self' as their first argument ('{}' takes none)",
                        def.name.name
                    ),
                ));
            };
            compiler.emitter.bind(&first.name.name, self_value);
        }
        let mut num_params = 0;
        for param in params {
            let graph = compiler.emitter.graph_mut();
            let input = graph.add_input();
            graph
                .set_value_name(input, &param.name.name)
                .map_err(|err| CompileError::at(&param.name.range, err.to_string()))?;
            compiler
                .emitter
                .bind(&param.name.name, Arc::new(SimpleValue::new(input)));
            num_params += 1;
        }

        compiler.emit_statements(&def.body, true)?;

        let Emitter {
            mut frames,
            members,
        } = compiler.emitter;
        let graph = frames.pop().expect("method frame").graph;
        tracing::debug!(
            method = %def.name.name,
            params = num_params,
            members = members.len(),
            nodes = graph.node_count(),
            "compiled definition"
        );
        Ok(Method {
            name: def.name.name.clone(),
            graph,
            num_params,
            members,
        })
    }

    fn resolve(&mut self, ident: &Ident) -> Result<Arc<dyn SugaredValue>, CompileError> {
        if !self.globals.contains(&ident.name) {
            if let Some(local) = self.emitter.lookup(&ident.name) {
                return Ok(local);
            }
        }
        (self.resolver)(&ident.name).ok_or_else(|| {
            CompileError::at(&ident.range, format!("undefined value {}", ident.name))
        })
    }

    fn is_local(&self, name: &str) -> bool {
        !self.globals.contains(name) && self.emitter.lookup(name).is_some()
    }

    /// Value of a local name, lifted into the innermost block.
    fn local_value(&mut self, name: &str, range: &SourceRange) -> Result<ValueId, CompileError> {
        let sugared = self
            .emitter
            .lookup(name)
            .ok_or_else(|| CompileError::at(range, format!("undefined value {name}")))?;
        sugared.as_value(range, &mut self.emitter)
    }

    fn bind_value(&mut self, ident: &Ident, value: ValueId) -> Result<(), CompileError> {
        if self.globals.contains(&ident.name) {
            return Err(CompileError::at(
                &ident.range,
                format!("cannot assign to global variable '{}'", ident.name),
            ));
        }
        let graph = self.emitter.graph_mut();
        if value.graph() == graph.id()
            && graph.producer(value).is_some()
            && graph.value(value).name().is_none()
        {
            graph
                .set_value_name(value, &ident.name)
                .map_err(|err| CompileError::at(&ident.range, err.to_string()))?;
        }
        self.emitter.bind(&ident.name, Arc::new(SimpleValue::new(value)));
        Ok(())
    }

    fn emit_statements(&mut self, stmts: &[Stmt], top_level: bool) -> Result<(), CompileError> {
        for (idx, stmt) in stmts.iter().enumerate() {
            match stmt {
                Stmt::Return { values, range } => {
                    if !top_level || idx + 1 != stmts.len() {
                        return Err(CompileError::at(
                            range,
                            "return is only supported as the last statement of a function",
                        ));
                    }
                    for value in values {
                        let output = self.emit_value(value)?;
                        self.emitter
                            .graph_mut()
                            .register_output(output)
                            .map_err(|err| CompileError::at(value.range(), err.to_string()))?;
                    }
                }
                Stmt::Global { names, .. } => {
                    for name in names {
                        self.globals.insert(name.name.clone());
                    }
                }
                Stmt::Assign {
                    targets,
                    kind,
                    value,
                    range,
                } => self.emit_assignment(targets, *kind, value, range)?,
                Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                    range,
                } => self.emit_if(cond, then_branch, else_branch, range)?,
                Stmt::While { cond, body, range } => self.emit_while(cond, body, range)?,
                Stmt::Expr(expr) => {
                    self.emit_sugared(expr)?;
                }
            }
        }
        Ok(())
    }

    fn emit_assignment(
        &mut self,
        targets: &[Ident],
        kind: AssignKind,
        value: &Expr,
        range: &SourceRange,
    ) -> Result<(), CompileError> {
        if let Some(op) = kind.binop() {
            let [target] = targets else {
                return Err(CompileError::at(
                    range,
                    format!("'{}' needs exactly one target", kind.symbol()),
                ));
            };
            let lhs = self.resolve(target)?.as_value(&target.range, &mut self.emitter)?;
            let rhs = self.emit_value(value)?;
            let result = self.emit_binary(op, lhs, rhs, range)?;
            return self.bind_value(target, result);
        }
        let outputs = self.emit_outputs(value, targets.len())?;
        for (target, output) in targets.iter().zip(outputs) {
            self.bind_value(target, output)?;
        }
        Ok(())
    }

    fn emit_sugared(&mut self, expr: &Expr) -> Result<Arc<dyn SugaredValue>, CompileError> {
        match expr {
            Expr::Var(ident) => self.resolve(ident),
            Expr::Select { value, field } => {
                let base = self.emit_sugared(value)?;
                base.attr(&field.range, &mut self.emitter, &field.name)
            }
            Expr::Apply { .. } => {
                let outputs = self.emit_outputs(expr, 1)?;
                Ok(Arc::new(SimpleValue::new(outputs[0])))
            }
            other => Ok(Arc::new(SimpleValue::new(self.emit_simple(other)?))),
        }
    }

    fn emit_value(&mut self, expr: &Expr) -> Result<ValueId, CompileError> {
        self.emit_sugared(expr)?
            .as_value(expr.range(), &mut self.emitter)
    }

    /// Evaluates `expr` into exactly `n` values; only calls can produce
    /// more than one.
    fn emit_outputs(&mut self, expr: &Expr, n: usize) -> Result<Vec<ValueId>, CompileError> {
        match expr {
            Expr::Apply {
                callee,
                inputs,
                attributes,
                range,
            } => {
                let callee = self.emit_sugared(callee)?;
                let inputs = inputs
                    .iter()
                    .map(|input| self.emit_value(input))
                    .collect::<Result<Vec<_>, _>>()?;
                let outputs = callee.call(range, &mut self.emitter, &inputs, attributes, n)?;
                if outputs.len() != n {
                    return Err(CompileError::at(
                        range,
                        format!("expected {n} values but the call produced {}", outputs.len()),
                    ));
                }
                Ok(outputs)
            }
            _ if n == 1 => Ok(vec![self.emit_value(expr)?]),
            _ => Err(CompileError::at(
                expr.range(),
                format!("cannot unpack a non-call expression into {n} values"),
            )),
        }
    }

    fn emit_op(
        &mut self,
        name: &str,
        inputs: &[ValueId],
        range: &SourceRange,
    ) -> Result<NodeId, CompileError> {
        self.emitter.emit_node(Symbol::aten(name), inputs, 1, range)
    }

    fn output_of(&self, node: NodeId) -> ValueId {
        self.emitter.graph().node(node).output(0)
    }

    /// Gives the output of `node` the contiguous type of its first input.
    fn propagate_type(&mut self, node: NodeId) {
        let graph = self.emitter.graph_mut();
        let n = graph.node(node);
        let (input, output) = (n.input(0), n.output(0));
        if let Type::Tensor(ty) = graph.value_type(input) {
            let ty = ty.contiguous();
            graph.set_value_type(output, ty);
        }
    }

    fn emit_binary(
        &mut self,
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
        range: &SourceRange,
    ) -> Result<ValueId, CompileError> {
        let node = self.emit_op(op.op_name(), &[lhs, rhs], range)?;
        if matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div) {
            self.propagate_type(node);
        }
        Ok(self.output_of(node))
    }

    fn emit_simple(&mut self, expr: &Expr) -> Result<ValueId, CompileError> {
        match expr {
            Expr::Const { value, ty, range } => Ok(self
                .emitter
                .emit_constant(Tensor::scalar(*value, ty.scalar_type()), range)),
            Expr::Unary { op, operand, range } => {
                let operand = self.emit_value(operand)?;
                let node = match op {
                    UnaryOp::Neg => {
                        let node = self.emit_op("neg", &[operand], range)?;
                        self.propagate_type(node);
                        node
                    }
                    UnaryOp::Not => self.emit_op("__not__", &[operand], range)?,
                };
                Ok(self.output_of(node))
            }
            Expr::Binary { op, lhs, rhs, range } => {
                let lhs = self.emit_value(lhs)?;
                let rhs = self.emit_value(rhs)?;
                self.emit_binary(*op, lhs, rhs, range)
            }
            Expr::IfExpr {
                cond,
                true_expr,
                false_expr,
                range,
            } => {
                let cond = self.emit_value(cond)?;
                let outputs = self.emit_conditional(
                    cond,
                    Block::Expr(true_expr),
                    Block::Expr(false_expr),
                    &[],
                    range,
                )?;
                Ok(outputs[0])
            }
            Expr::Gather {
                value,
                index,
                range,
            } => {
                let value = self.emit_value(value)?;
                let index = self.emit_value(index)?;
                let node = self.emit_op("index_select", &[value, index], range)?;
                self.emitter.graph_mut().node_mut(node).set_i("dim", 0);
                Ok(self.output_of(node))
            }
            Expr::Slice {
                value,
                start,
                end,
                range,
            } => {
                let start = match start {
                    Some(start) => constant_index(start)?,
                    None => 0,
                };
                let end = match end {
                    Some(end) => constant_index(end)?,
                    None => i64::MAX,
                };
                let value = self.emit_value(value)?;
                let node = self.emit_op("slice", &[value], range)?;
                self.emitter
                    .graph_mut()
                    .node_mut(node)
                    .set_i("dim", 0)
                    .set_i("start", start)
                    .set_i("end", end)
                    .set_i("step", 1);
                Ok(self.output_of(node))
            }
            Expr::Cast { ty, operand, range } => {
                let operand = self.emit_value(operand)?;
                let node = self.emit_op("_cast", &[operand], range)?;
                let graph = self.emitter.graph_mut();
                graph.node_mut(node).set_s("dtype", ty.name());
                if let Type::Tensor(input) = graph.value_type(operand) {
                    let cast = input.with_scalar_type(*ty).contiguous();
                    let output = graph.node(node).output(0);
                    graph.set_value_type(output, cast);
                }
                Ok(self.output_of(node))
            }
            Expr::List { range, .. } => Err(CompileError::at(
                range,
                "list literals are only allowed as keyword argument values",
            )),
            Expr::Var(_) | Expr::Select { .. } | Expr::Apply { .. } => self.emit_value(expr),
        }
    }

    /// Compiles `block` into a fresh subgraph whose outputs are the values of
    /// `outputs` (or the block expression). `seed` pre-captures enclosing
    /// values so sibling branches share input positions.
    fn emit_block(
        &mut self,
        block: Block<'_>,
        seed: &[ValueId],
        outputs: &[String],
        range: &SourceRange,
    ) -> Result<(Graph, Vec<ValueId>), CompileError> {
        self.emitter.push_frame();
        let result = self.emit_block_body(block, seed, outputs, range);
        let frame = self.emitter.pop_frame();
        result?;
        let captures = frame.captures.iter().map(|&(outer, _)| outer).collect();
        Ok((frame.graph, captures))
    }

    fn emit_block_body(
        &mut self,
        block: Block<'_>,
        seed: &[ValueId],
        outputs: &[String],
        range: &SourceRange,
    ) -> Result<(), CompileError> {
        for &value in seed {
            self.emitter
                .lift(value)
                .map_err(|err| CompileError::at(range, err.to_string()))?;
        }
        let mut results = Vec::new();
        match block {
            Block::Stmts(stmts) => self.emit_statements(stmts, false)?,
            Block::Expr(expr) => results.push(self.emit_value(expr)?),
        }
        for name in outputs {
            results.push(self.local_value(name, range)?);
        }
        for value in results {
            self.emitter
                .graph_mut()
                .register_output(value)
                .map_err(|err| CompileError::at(range, err.to_string()))?;
        }
        Ok(())
    }

    /// Emits a `prim::If` over two blocks and returns its outputs.
    fn emit_conditional(
        &mut self,
        cond: ValueId,
        then_block: Block<'_>,
        else_block: Block<'_>,
        outputs: &[String],
        range: &SourceRange,
    ) -> Result<Vec<ValueId>, CompileError> {
        let (mut then_graph, then_captures) = self.emit_block(then_block, &[], outputs, range)?;
        let (else_graph, captures) = self.emit_block(else_block, &then_captures, outputs, range)?;
        // captures made only by the else branch become unused then-branch inputs
        for &extra in &captures[then_captures.len()..] {
            let input = then_graph.add_input();
            then_graph
                .copy_value_metadata(self.emitter.graph(), extra, input)
                .map_err(|err| CompileError::at(range, err.to_string()))?;
        }
        let num_outputs = then_graph.outputs().len();
        let output_types: Vec<Type> = then_graph
            .outputs()
            .iter()
            .map(|&v| then_graph.value_type(v).clone())
            .collect();

        let mut inputs = vec![cond];
        inputs.extend(captures);
        let node = self.emitter.emit_node(kinds::IF, &inputs, num_outputs, range)?;
        let graph = self.emitter.graph_mut();
        graph
            .node_mut(node)
            .attributes_mut()
            .set_g("then_branch", Arc::new(then_graph))
            .set_g("else_branch", Arc::new(else_graph));
        let results = graph.node(node).outputs().to_vec();
        for (&value, ty) in results.iter().zip(output_types) {
            graph.set_value_type(value, ty);
        }
        Ok(results)
    }

    fn emit_if(
        &mut self,
        cond: &Expr,
        then_branch: &[Stmt],
        else_branch: &[Stmt],
        range: &SourceRange,
    ) -> Result<(), CompileError> {
        let cond = self.emit_value(cond)?;
        let then_assigned = assigned_names(then_branch);
        let else_assigned = assigned_names(else_branch);
        let mut outputs: Vec<String> = Vec::new();
        for (assigned, other) in [(&then_assigned, &else_assigned), (&else_assigned, &then_assigned)] {
            for name in assigned {
                if (other.contains(name) || self.is_local(name)) && !outputs.contains(name) {
                    outputs.push(name.clone());
                }
            }
        }
        let results = self.emit_conditional(
            cond,
            Block::Stmts(then_branch),
            Block::Stmts(else_branch),
            &outputs,
            range,
        )?;
        for (name, value) in outputs.iter().zip(results) {
            let ident = Ident {
                name: name.clone(),
                range: range.clone(),
            };
            self.bind_value(&ident, value)?;
        }
        Ok(())
    }

    fn emit_while(
        &mut self,
        cond: &Expr,
        body: &[Stmt],
        range: &SourceRange,
    ) -> Result<(), CompileError> {
        let carried: Vec<String> = assigned_names(body)
            .into_iter()
            .filter(|name| self.is_local(name))
            .collect();
        let first_cond = self.emit_value(cond)?;
        let initial = carried
            .iter()
            .map(|name| self.local_value(name, range))
            .collect::<Result<Vec<_>, _>>()?;

        self.emitter.push_frame();
        let result = self.emit_loop_body(cond, body, &carried, &initial, range);
        let frame = self.emitter.pop_frame();
        result?;

        let captures: Vec<ValueId> = frame.captures.iter().map(|&(outer, _)| outer).collect();
        let mut inputs = vec![first_cond];
        inputs.extend(&initial);
        inputs.extend(captures);
        let node = self
            .emitter
            .emit_node(kinds::WHILE, &inputs, carried.len(), range)?;
        let graph = self.emitter.graph_mut();
        graph
            .node_mut(node)
            .attributes_mut()
            .set_g("body", Arc::new(frame.graph));
        let results = graph.node(node).outputs().to_vec();
        for (&value, &init) in results.iter().zip(&initial) {
            let ty = graph.value_type(init).clone();
            graph.set_value_type(value, ty);
        }
        for (name, value) in carried.iter().zip(results) {
            let ident = Ident {
                name: name.clone(),
                range: range.clone(),
            };
            self.bind_value(&ident, value)?;
        }
        Ok(())
    }

    fn emit_loop_body(
        &mut self,
        cond: &Expr,
        body: &[Stmt],
        carried: &[String],
        initial: &[ValueId],
        range: &SourceRange,
    ) -> Result<(), CompileError> {
        let depth = self.emitter.frames.len();
        for (name, &init) in carried.iter().zip(initial) {
            let (outer, inner) = self.emitter.frames.split_at_mut(depth - 1);
            let graph = &mut inner[0].graph;
            let input = graph.add_input();
            graph
                .copy_value_metadata(&outer[depth - 2].graph, init, input)
                .map_err(|err| CompileError::at(range, err.to_string()))?;
            self.emitter.bind(name, Arc::new(SimpleValue::new(input)));
        }
        self.emit_statements(body, false)?;
        let next_cond = self.emit_value(cond)?;
        let mut results = vec![next_cond];
        for name in carried {
            results.push(self.local_value(name, range)?);
        }
        for value in results {
            self.emitter
                .graph_mut()
                .register_output(value)
                .map_err(|err| CompileError::at(range, err.to_string()))?;
        }
        Ok(())
    }
}

/// Integer constant used as a slice bound.
fn constant_index(expr: &Expr) -> Result<i64, CompileError> {
    match expr {
        Expr::Const { value, ty, .. } if ty.is_integral() => Ok(*value as i64),
        Expr::Unary {
            op: UnaryOp::Neg,
            operand,
            ..
        } => constant_index(operand).map(|v| -v),
        other => Err(CompileError::at(
            other.range(),
            "slice bounds must be integer constants",
        )),
    }
}

/// Names assigned anywhere in `stmts`, nested blocks included, in first
/// assignment order.
fn assigned_names(stmts: &[Stmt]) -> Vec<String> {
    fn walk(stmts: &[Stmt], names: &mut Vec<String>) {
        for stmt in stmts {
            match stmt {
                Stmt::Assign { targets, .. } => {
                    for target in targets {
                        if !names.contains(&target.name) {
                            names.push(target.name.clone());
                        }
                    }
                }
                Stmt::If {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    walk(then_branch, names);
                    walk(else_branch, names);
                }
                Stmt::While { body, .. } => walk(body, names),
                Stmt::Global { .. } | Stmt::Return { .. } | Stmt::Expr(_) => {}
            }
        }
    }
    let mut names = Vec::new();
    walk(stmts, &mut names);
    names
}
