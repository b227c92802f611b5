//! Things a name can stand for before it becomes a graph value.
//!
//! A [`SugaredValue`] exposes three capabilities: use as a value, attribute
//! lookup and calling. Each concrete kind implements the ones it supports;
//! the rest fail with a diagnostic naming the kind.

use super::compiler::{CompileError, Emitter, Module};
use super::tree::{Attribute, Expr};
use crate::ir::{Node, SourceRange, Symbol, Type, ValueId};
use crate::passes::onnx::all_symbolic_defs;
use crate::tensor::ScalarType;
use std::sync::Arc;

pub trait SugaredValue: Send + Sync {
    /// Human readable kind, used in diagnostics.
    fn kind(&self) -> String;

    /// Use as an operand, e.g. `this + 4`.
    fn as_value(&self, range: &SourceRange, _emitter: &mut Emitter) -> Result<ValueId, CompileError> {
        Err(CompileError::at(
            range,
            format!("{} cannot be used as a value", self.kind()),
        ))
    }

    /// Attribute lookup, e.g. `this.field`.
    fn attr(
        &self,
        range: &SourceRange,
        _emitter: &mut Emitter,
        _field: &str,
    ) -> Result<Arc<dyn SugaredValue>, CompileError> {
        Err(CompileError::at(
            range,
            format!("attribute lookup is not defined on {}", self.kind()),
        ))
    }

    /// Call producing `n_outputs` values, e.g. `a, b = this(x)`.
    fn call(
        &self,
        range: &SourceRange,
        _emitter: &mut Emitter,
        _inputs: &[ValueId],
        _attributes: &[Attribute],
        _n_outputs: usize,
    ) -> Result<Vec<ValueId>, CompileError> {
        Err(CompileError::at(range, format!("cannot call a {}", self.kind())))
    }
}

/// Maps free names to sugared values; consulted after the local environment.
pub type Resolver = Arc<dyn Fn(&str) -> Option<Arc<dyn SugaredValue>> + Send + Sync>;

/// Resolves every name that has a built-in ONNX lowering (`add`, `sigmoid`,
/// `view`, ...) to the corresponding `aten::` operator.
pub fn builtin_resolver() -> Resolver {
    Arc::new(|name: &str| {
        let kind = Symbol::aten(name);
        if all_symbolic_defs().iter().any(|def| def.kind == kind.as_str()) {
            Some(Arc::new(BuiltinFunction::new(kind)) as Arc<dyn SugaredValue>)
        } else {
            None
        }
    })
}

/// A plain graph value.
#[derive(Debug, Clone, Copy)]
pub struct SimpleValue {
    value: ValueId,
}

impl SimpleValue {
    pub fn new(value: ValueId) -> Self {
        SimpleValue { value }
    }

    pub fn value(&self) -> ValueId {
        self.value
    }
}

fn method_cast(field: &str) -> Option<ScalarType> {
    Some(match field {
        "double" => ScalarType::Double,
        "float" => ScalarType::Float,
        "half" => ScalarType::Half,
        "byte" => ScalarType::Byte,
        "char" => ScalarType::Char,
        "short" => ScalarType::Short,
        "int" => ScalarType::Int,
        "long" => ScalarType::Long,
        _ => return None,
    })
}

impl SugaredValue for SimpleValue {
    fn kind(&self) -> String {
        "value".to_string()
    }

    fn as_value(&self, range: &SourceRange, emitter: &mut Emitter) -> Result<ValueId, CompileError> {
        emitter
            .lift(self.value)
            .map_err(|err| CompileError::at(range, err.to_string()))
    }

    /// Method-style calls: `x.float()` casts, `x.op(...)` calls `aten::op`
    /// with `x` as the first input.
    fn attr(
        &self,
        _range: &SourceRange,
        _emitter: &mut Emitter,
        field: &str,
    ) -> Result<Arc<dyn SugaredValue>, CompileError> {
        let function = match method_cast(field) {
            Some(scalar_type) => BuiltinFunction::cast(scalar_type),
            None => BuiltinFunction::new(Symbol::aten(field)),
        };
        Ok(Arc::new(function.bound_to(self.value)))
    }
}

/// An operator called by name; emits one node of its kind.
#[derive(Debug, Clone)]
pub struct BuiltinFunction {
    kind: Symbol,
    bound: Option<ValueId>,
    cast: Option<ScalarType>,
}

impl BuiltinFunction {
    pub fn new(kind: Symbol) -> Self {
        BuiltinFunction {
            kind,
            bound: None,
            cast: None,
        }
    }

    /// `aten::_cast` to `scalar_type`.
    pub fn cast(scalar_type: ScalarType) -> Self {
        BuiltinFunction {
            kind: Symbol::aten("_cast"),
            bound: None,
            cast: Some(scalar_type),
        }
    }

    /// Passes `value` as the first input of every call.
    pub fn bound_to(mut self, value: ValueId) -> Self {
        self.bound = Some(value);
        self
    }

    pub fn symbol(&self) -> &Symbol {
        &self.kind
    }
}

impl SugaredValue for BuiltinFunction {
    fn kind(&self) -> String {
        format!("builtin function {}", self.kind)
    }

    fn call(
        &self,
        range: &SourceRange,
        emitter: &mut Emitter,
        inputs: &[ValueId],
        attributes: &[Attribute],
        n_outputs: usize,
    ) -> Result<Vec<ValueId>, CompileError> {
        let all_inputs: Vec<ValueId> = self.bound.iter().chain(inputs).copied().collect();
        let node = emitter.emit_node(self.kind.clone(), &all_inputs, n_outputs, range)?;
        let graph = emitter.graph_mut();
        if let Some(scalar_type) = self.cast {
            graph.node_mut(node).set_s("dtype", scalar_type.name());
            let n = graph.node(node);
            if let (Some(&input), Some(&output)) = (n.inputs().first(), n.outputs().first()) {
                if let Type::Tensor(ty) = graph.value_type(input) {
                    let cast = ty.with_scalar_type(scalar_type).contiguous();
                    graph.set_value_type(output, cast);
                }
            }
        }
        set_keyword_attributes(graph.node_mut(node), attributes)?;
        Ok(graph.node(node).outputs().to_vec())
    }
}

/// Stores `name=value` call arguments as node attributes: integral constants
/// become `i`, floating ones `f`, lists `is` or `fs`.
pub(crate) fn set_keyword_attributes(
    node: &mut Node,
    attributes: &[Attribute],
) -> Result<(), CompileError> {
    for attribute in attributes {
        let name = &attribute.name.name;
        match &attribute.value {
            Expr::Const { value, ty, .. } => {
                if ty.is_integral() {
                    node.set_i(name, *value as i64);
                } else {
                    node.set_f(name, *value);
                }
            }
            Expr::List { elements, .. } => {
                let mut integral = true;
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    match element {
                        Expr::Const { value, ty, .. } => {
                            integral &= ty.is_integral();
                            values.push(*value);
                        }
                        other => {
                            return Err(CompileError::at(
                                other.range(),
                                format!("list attribute '{name}' may only hold constants"),
                            ))
                        }
                    }
                }
                if integral {
                    node.set_is(name, values.into_iter().map(|v| v as i64).collect());
                } else {
                    node.attributes_mut().set_fs(name, values);
                }
            }
            other => {
                return Err(CompileError::at(
                    other.range(),
                    format!("keyword argument '{name}' must be a constant or a list of constants"),
                ))
            }
        }
    }
    Ok(())
}

/// A module seen through `self`: parameters become member inputs of the
/// method being compiled, submodules nest.
#[derive(Clone)]
pub struct ModuleValue {
    module: Arc<Module>,
    prefix: String,
}

impl ModuleValue {
    pub fn new(module: Arc<Module>) -> Self {
        ModuleValue {
            module,
            prefix: String::new(),
        }
    }
}

impl SugaredValue for ModuleValue {
    fn kind(&self) -> String {
        "module".to_string()
    }

    fn attr(
        &self,
        range: &SourceRange,
        emitter: &mut Emitter,
        field: &str,
    ) -> Result<Arc<dyn SugaredValue>, CompileError> {
        let qualified = format!("{}{field}", self.prefix);
        if let Some(tensor) = self.module.parameter(field) {
            let value = emitter.member(&qualified, &tensor, range)?;
            return Ok(Arc::new(SimpleValue::new(value)));
        }
        if let Some(submodule) = self.module.submodule(field) {
            return Ok(Arc::new(ModuleValue {
                module: submodule,
                prefix: format!("{qualified}."),
            }));
        }
        if self.module.method(field).is_some() {
            return Err(CompileError::at(
                range,
                format!("calling method '{field}' from another method is not supported"),
            ));
        }
        Err(CompileError::at(
            range,
            format!("module has no attribute '{field}'"),
        ))
    }
}
